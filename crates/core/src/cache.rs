use std::collections::HashMap;

use log::debug;

use crate::path::NormalizedPath;
use crate::session::DocumentSession;

/// 非作用中文件的有界 LRU 快取。 / Bounded LRU cache of sessions for documents that are not active.
#[derive(Debug)]
pub struct SessionCache {
    capacity: usize,
    entries: HashMap<NormalizedPath, DocumentSession>,
}

impl SessionCache {
    /// 建立指定容量的快取（至少為 1）。 / Creates a cache holding at most `capacity` sessions (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &NormalizedPath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &NormalizedPath) -> Option<&DocumentSession> {
        self.entries.get(path)
    }

    /// 取出項目，使其離開快取。 / Removes and returns the entry so it can become active.
    pub fn take(&mut self, path: &NormalizedPath) -> Option<DocumentSession> {
        self.entries.remove(path)
    }

    /// 放入工作階段；超出容量時先淘汰最久未使用者。 / Inserts a session, evicting the least recently touched entry first when full.
    pub fn put(&mut self, session: DocumentSession) -> Option<DocumentSession> {
        let evicted = if !self.entries.contains_key(session.path())
            && self.entries.len() >= self.capacity
        {
            self.evict_oldest()
        } else {
            None
        };
        self.entries.insert(session.path().clone(), session);
        evicted
    }

    /// 移除指定路徑的項目。 / Drops the entry for `path`.
    pub fn invalidate(&mut self, path: &NormalizedPath) -> Option<DocumentSession> {
        let removed = self.entries.remove(path);
        if removed.is_some() {
            debug!("session cache: invalidated {path}");
        }
        removed
    }

    /// 清空快取並交回所有項目，不會自動儲存。 / Empties the cache and hands the sessions back; nothing is saved implicitly.
    pub fn clear(&mut self) -> Vec<DocumentSession> {
        self.entries.drain().map(|(_, session)| session).collect()
    }

    /// 仍有未儲存編輯的快取路徑。 / Cached paths still holding unsaved edits.
    pub fn dirty_paths(&self) -> Vec<NormalizedPath> {
        let mut paths: Vec<_> = self
            .entries
            .values()
            .filter(|session| session.is_dirty())
            .map(|session| session.path().clone())
            .collect();
        paths.sort();
        paths
    }

    fn evict_oldest(&mut self) -> Option<DocumentSession> {
        // 時間相同時以路徑排序，確保只淘汰一個。 / Equal timestamps fall back to path order.
        let oldest = self
            .entries
            .values()
            .min_by(|a, b| {
                a.last_touched()
                    .cmp(&b.last_touched())
                    .then_with(|| a.path().cmp(b.path()))
            })
            .map(|session| session.path().clone())?;
        debug!("session cache: evicting {oldest}");
        self.entries.remove(&oldest)
    }
}
