use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{debug, trace};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

use crate::bridge::{ChangeKind, ExternalChange};
use crate::path::NormalizedPath;
use crate::store::TEMP_SUFFIX;

/// 監控檔案變更時可能回傳的錯誤。 / Error type for directory watching.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("watcher channel disconnected")]
    ChannelDisconnected,
}

#[derive(Debug, Clone)]
struct PendingChange {
    kind: ChangeKind,
    last_seen: Instant,
}

/// 依路徑合併短時間內的多次原始事件。 / Collapses bursts of raw events into one notification per path.
///
/// Every new event for a path restarts that path's quiet window; the
/// notification is released once the path has been quiet for `window`.
#[derive(Debug)]
pub struct ChangeDebouncer {
    window: Duration,
    pending: HashMap<NormalizedPath, PendingChange>,
}

impl ChangeDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn register(&mut self, path: NormalizedPath, kind: ChangeKind, now: Instant) {
        match self.pending.get_mut(&path) {
            Some(existing) => {
                existing.kind = merge_kinds(&existing.kind, kind);
                existing.last_seen = now;
            }
            None => {
                self.pending.insert(
                    path,
                    PendingChange {
                        kind,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// 取出已安靜超過視窗的變更。 / Releases changes whose quiet window has elapsed.
    pub fn flush_ready(&mut self, now: Instant) -> Vec<ExternalChange> {
        let window = self.window;
        let mut ready = Vec::new();
        self.pending.retain(|path, change| {
            if now.saturating_duration_since(change.last_seen) >= window {
                ready.push(ExternalChange::new(
                    path.clone(),
                    change.kind.clone(),
                    change.last_seen,
                ));
                false
            } else {
                true
            }
        });
        ready.sort_by(|a, b| {
            a.observed_at
                .cmp(&b.observed_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        ready
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|change| change.last_seen + self.window)
            .min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn merge_kinds(previous: &ChangeKind, next: ChangeKind) -> ChangeKind {
    match (previous, next) {
        // 建立後又修改仍視為建立；改名後的修改保留改名來源。 / Creation or rename followed by writes keeps the stronger kind.
        (ChangeKind::Created, ChangeKind::Modified) => ChangeKind::Created,
        (ChangeKind::Renamed { from }, ChangeKind::Modified) => {
            ChangeKind::Renamed { from: from.clone() }
        }
        (_, next) => next,
    }
}

/// 封裝 `notify` 監看整個筆記目錄。 / Wraps `notify` to watch a notes directory recursively.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    root: NormalizedPath,
    rx: Receiver<(NormalizedPath, ChangeKind)>,
    debouncer: ChangeDebouncer,
}

impl DirectoryWatcher {
    /// 開始監看目錄。 / Starts watching `root` and everything below it.
    pub fn new(root: impl AsRef<Path>, debounce: Duration) -> Result<Self, WatcherError> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    for mapped in map_event(event) {
                        let _ = tx.send(mapped);
                    }
                }
            },
            Config::default(),
        )?;
        watcher.watch(root.as_ref(), RecursiveMode::Recursive)?;
        let root = NormalizedPath::new(root);
        debug!("watcher: watching {root}");

        Ok(Self {
            _watcher: watcher,
            root,
            rx,
            debouncer: ChangeDebouncer::new(debounce),
        })
    }

    pub fn root(&self) -> &NormalizedPath {
        &self.root
    }

    /// 非阻塞地收集事件並回傳已去抖動的通知。 / Drains raw events without blocking and returns debounced notifications.
    pub fn poll(&mut self, now: Instant) -> Vec<ExternalChange> {
        while let Ok((path, kind)) = self.rx.try_recv() {
            trace!("watcher: raw {kind:?} for {path}");
            self.debouncer.register(path, kind, now);
        }
        self.debouncer.flush_ready(now)
    }

    /// 最多等待 `timeout` 取得新事件。 / Waits up to `timeout` for raw events, then polls.
    pub fn wait(&mut self, timeout: Duration) -> Result<Vec<ExternalChange>, WatcherError> {
        let wait_for = self
            .debouncer
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).min(timeout))
            .unwrap_or(timeout);
        match self.rx.recv_timeout(wait_for) {
            Ok((path, kind)) => self.debouncer.register(path, kind, Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Err(WatcherError::ChannelDisconnected),
        }
        Ok(self.poll(Instant::now()))
    }
}

fn map_event(event: notify::Event) -> Vec<(NormalizedPath, ChangeKind)> {
    let paths: Vec<NormalizedPath> = event
        .paths
        .iter()
        .filter(|path| !path.to_string_lossy().ends_with(TEMP_SUFFIX))
        .map(NormalizedPath::new)
        .collect();
    let Some(primary) = paths.first().cloned() else {
        return Vec::new();
    };

    let kind = match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            return vec![(paths[1].clone(), ChangeKind::Renamed { from: primary })];
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Remove(_) => ChangeKind::Removed,
        _ => return Vec::new(),
    };

    paths.into_iter().map(|path| (path, kind.clone())).collect()
}
