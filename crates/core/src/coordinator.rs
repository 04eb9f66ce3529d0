use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};

use crate::autosave::AutosaveScheduler;
use crate::bridge::{decide, BridgeDecision, ExternalChange};
use crate::cache::SessionCache;
use crate::clock::Clock;
use crate::codec::DocumentFormat;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, ReadError, SaveError};
use crate::path::NormalizedPath;
use crate::save::{ClosedWindow, SaveCoordinator, SaveOutcome};
use crate::session::{DiskSnapshot, DocumentSession, Revalidated};
use crate::store::{DirectoryRefresh, DocumentStore};

/// 交給宿主顯示的非阻塞通知。 / Non-blocking information for the host UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// 磁碟已變更但本地仍有未儲存編輯。 / Disk changed while local edits are unsaved; nothing was overwritten.
    Conflict { path: NormalizedPath },
    Reloaded { path: NormalizedPath },
    /// 作用中文件在磁碟上被刪除或移走。 / The active document vanished from disk; its content is kept.
    ActiveRemoved { path: NormalizedPath },
    AutosaveFailed { path: NormalizedPath, error: String },
    /// 快取中的未儲存編輯因磁碟變更而捨棄，內容交還宿主。 / Cached unsaved edits lost to a disk change; here is their content.
    CachedEditsDiscarded { path: NormalizedPath, content: String },
    /// 被淘汰的文件無法寫回，內容交還宿主。 / An evicted session could not be flushed; here is its content.
    EvictedUnsaved { path: NormalizedPath, content: String },
    SavingLargeDocument { path: NormalizedPath, bytes: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    AlreadyActive,
    /// 由快取還原（含未儲存編輯）。 / Restored from the cache, unsaved edits included.
    Restored,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveReport {
    Saved,
    /// 沒有需要儲存的變更。 / Nothing to persist.
    Unchanged,
}

/// 多文件工作階段快取與自動儲存的協調者，每個視窗一個。 / Owns every piece of per-window document state.
///
/// All work runs on the caller's thread. Timers are plain deadlines checked by
/// [`NoteCoordinator::tick`]; the host calls it whenever
/// [`NoteCoordinator::next_deadline`] has passed.
pub struct NoteCoordinator<S, D, C>
where
    S: DocumentStore,
    D: DirectoryRefresh,
    C: Clock,
{
    config: CoordinatorConfig,
    store: S,
    refresh: D,
    clock: C,
    root: Option<NormalizedPath>,
    active: Option<DocumentSession>,
    cache: SessionCache,
    autosave: AutosaveScheduler,
    saves: SaveCoordinator,
    notices: Vec<Notice>,
}

impl<S, D, C> NoteCoordinator<S, D, C>
where
    S: DocumentStore,
    D: DirectoryRefresh,
    C: Clock,
{
    pub fn new(config: CoordinatorConfig, store: S, refresh: D, clock: C) -> Self {
        Self {
            cache: SessionCache::new(config.cache_capacity),
            autosave: AutosaveScheduler::new(config.autosave_delay),
            saves: SaveCoordinator::new(config.save_timeout, config.save_grace_period),
            config,
            store,
            refresh,
            clock,
            root: None,
            active: None,
            notices: Vec::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn root(&self) -> Option<&NormalizedPath> {
        self.root.as_ref()
    }

    pub fn active(&self) -> Option<&DocumentSession> {
        self.active.as_ref()
    }

    pub fn active_path(&self) -> Option<&NormalizedPath> {
        self.active.as_ref().map(DocumentSession::path)
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn is_save_window_open(&self, path: &NormalizedPath) -> bool {
        self.saves.is_open(path)
    }

    /// 取出累積的通知。 / Drains queued notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// 下一個需要呼叫 `tick` 的時間點。 / When `tick` next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.autosave.deadline(), self.saves.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// 所有尚未儲存的路徑。 / Every path holding unsaved edits, active first.
    pub fn dirty_documents(&self) -> Vec<NormalizedPath> {
        let mut dirty: Vec<_> = self
            .active
            .iter()
            .filter(|session| session.is_dirty())
            .map(|session| session.path().clone())
            .collect();
        dirty.extend(self.cache.dirty_paths());
        dirty
    }

    /// 切換筆記根目錄；先保護未儲存的文件。 / Switches the notes root after persisting every dirty session.
    pub fn open_directory(&mut self, root: impl AsRef<Path>) -> Result<(), CoordinatorError> {
        let root = NormalizedPath::new(root);
        if self.root.as_ref() == Some(&root) {
            return Ok(());
        }
        self.persist_before_teardown()?;
        self.teardown_sessions();
        info!("coordinator: opened directory {root}");
        self.refresh.refresh(&root);
        self.root = Some(root);
        Ok(())
    }

    pub fn close_directory(&mut self) -> Result<(), CoordinatorError> {
        self.persist_before_teardown()?;
        self.teardown_sessions();
        if let Some(root) = self.root.take() {
            info!("coordinator: closed directory {root}");
        }
        Ok(())
    }

    /// 切換作用中文件。 / Makes `path` the active document.
    ///
    /// A dirty outgoing document is saved first; if that fails the switch is
    /// aborted and the outgoing document stays active with its edits intact.
    pub fn select(&mut self, path: impl AsRef<Path>) -> Result<SelectOutcome, CoordinatorError> {
        let path = NormalizedPath::new(path);
        let now = self.clock.now();

        if let Some(active) = self.active.as_mut() {
            if active.path() == &path {
                active.touch(now);
                return Ok(SelectOutcome::AlreadyActive);
            }
        }

        if let Some(outgoing) = self.active_path().cloned() {
            self.autosave.cancel_for(&outgoing);
            let dirty = self.active.as_ref().is_some_and(DocumentSession::is_dirty);
            // 衝突中的文件不可停放：其磁碟快照已過期，回來時必定被捨棄。 / A conflicted session's snapshot is stale, so it is saved instead of parked.
            let conflicted = self.active.as_ref().is_some_and(DocumentSession::in_conflict);
            if dirty && (conflicted || !self.config.park_dirty_on_switch) {
                if let Err(source) = self.save_active_inner(true) {
                    warn!("coordinator: staying on {outgoing}, save before switch failed: {source}");
                    return Err(CoordinatorError::SwitchBlocked {
                        path: outgoing,
                        source,
                    });
                }
            }
        }

        let (incoming, outcome) = match self.load_session(&path, now) {
            Ok(loaded) => loaded,
            Err(err) => {
                self.rearm_autosave(now);
                return Err(err);
            }
        };
        if let Some(mut outgoing) = self.active.take() {
            outgoing.touch(now);
            self.park(outgoing);
        }
        debug!("coordinator: {path} is now active ({outcome:?})");
        self.active = Some(incoming);
        Ok(outcome)
    }

    /// 套用使用者編輯並重設自動儲存計時器。 / Applies an edit to the active document and re-arms autosave.
    pub fn edit(&mut self, content: impl Into<String>) -> Result<(), CoordinatorError> {
        let now = self.clock.now();
        let active = self
            .active
            .as_mut()
            .ok_or(CoordinatorError::NoActiveDocument)?;
        if !active.edit(content, now) {
            return Ok(());
        }
        let path = active.path().clone();
        if active.is_dirty() && self.config.autosave_enabled {
            self.autosave.schedule(&path, now);
        } else {
            self.autosave.cancel_for(&path);
        }
        Ok(())
    }

    /// 手動儲存；失敗時文件維持未儲存。 / Manual save; on failure the document stays dirty.
    pub fn save_active(&mut self) -> Result<SaveReport, CoordinatorError> {
        let path = self
            .active_path()
            .cloned()
            .ok_or(CoordinatorError::NoActiveDocument)?;
        let report = self.save_active_inner(false)?;
        if self.active.as_ref().is_some_and(|active| !active.is_dirty()) {
            self.autosave.cancel_for(&path);
        }
        Ok(report)
    }

    /// 捨棄本地編輯並以磁碟內容為準。 / Drops local edits in favour of disk, e.g. to resolve a conflict.
    pub fn discard_changes(&mut self) -> Result<(), CoordinatorError> {
        let now = self.clock.now();
        let path = self
            .active_path()
            .cloned()
            .ok_or(CoordinatorError::NoActiveDocument)?;
        let loaded = self.store.read_document(&path)?;
        if let Some(active) = self.active.as_mut() {
            active.replace_from_disk(loaded, now);
        }
        self.autosave.cancel_for(&path);
        info!("coordinator: discarded local edits for {path}");
        Ok(())
    }

    /// 推進所有計時器。 / Fires every timer whose deadline has passed.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        for closed in self.saves.close_expired(now) {
            self.finish_window(closed);
        }
        if let Some(path) = self.autosave.poll(now) {
            self.run_autosave(&path);
        }
    }

    /// 接收去抖動後的監看通知。 / Entry point for debounced watcher notifications.
    pub fn handle_external_change(&mut self, change: ExternalChange) {
        self.dispatch_change(change);
    }

    /// 關閉視窗前寫回所有未儲存文件，回傳失敗清單。 / Persists every dirty session before the window goes away.
    pub fn shutdown(&mut self) -> Vec<(NormalizedPath, SaveError)> {
        self.autosave.cancel();
        let mut failures = Vec::new();

        if let Some(path) = self.active_path().cloned() {
            if let Err(err) = self.save_active_inner(false) {
                failures.push((path, err));
            }
        }

        for path in self.cache.dirty_paths() {
            let Some(mut session) = self.cache.take(&path) else {
                continue;
            };
            if let Err(err) = self.save_detached(&mut session) {
                failures.push((path, err));
            }
            self.park(session);
        }

        if !failures.is_empty() {
            warn!("coordinator: {} document(s) could not be saved on shutdown", failures.len());
        }
        failures
    }

    /// 切換失敗後恢復作用中文件的自動儲存。 / Restores the active document's autosave after an aborted switch.
    fn rearm_autosave(&mut self, now: Instant) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        if self.config.autosave_enabled && active.is_dirty() && !active.in_conflict() {
            let path = active.path().clone();
            self.autosave.schedule(&path, now);
        }
    }

    fn persist_before_teardown(&mut self) -> Result<(), CoordinatorError> {
        if let Some(path) = self.active_path().cloned() {
            self.save_active_inner(true)
                .map_err(|source| CoordinatorError::SwitchBlocked { path, source })?;
        }
        for path in self.cache.dirty_paths() {
            let Some(mut session) = self.cache.take(&path) else {
                continue;
            };
            let result = self.save_detached(&mut session);
            self.park(session);
            result.map_err(|source| CoordinatorError::SwitchBlocked { path, source })?;
        }
        Ok(())
    }

    fn teardown_sessions(&mut self) {
        self.autosave.cancel();
        self.saves.clear();
        self.active = None;
        let dropped = self.cache.clear();
        debug!("coordinator: dropped {} cached session(s)", dropped.len());
    }

    fn load_session(
        &mut self,
        path: &NormalizedPath,
        now: Instant,
    ) -> Result<(DocumentSession, SelectOutcome), CoordinatorError> {
        let cached = self.cache.take(path);
        let fresh = match self.store.read_document(path) {
            Ok(fresh) => fresh,
            Err(err) => {
                if let Some(cached) = cached {
                    match err {
                        ReadError::NotFound { .. } => self.surrender(cached),
                        _ => self.park(cached),
                    }
                }
                return Err(err.into());
            }
        };

        let Some(cached) = cached else {
            return Ok((
                DocumentSession::open(path.clone(), fresh, now),
                SelectOutcome::Loaded,
            ));
        };

        match cached.revalidate(fresh, now) {
            Revalidated::Restored(session) => Ok((session, SelectOutcome::Restored)),
            Revalidated::Replaced {
                session,
                dropped_edits,
            } => {
                if let Some(content) = dropped_edits {
                    info!("coordinator: {path} changed on disk, cached edits dropped");
                    self.notices.push(Notice::CachedEditsDiscarded {
                        path: path.clone(),
                        content,
                    });
                }
                Ok((session, SelectOutcome::Loaded))
            }
        }
    }

    fn park(&mut self, session: DocumentSession) {
        if let Some(evicted) = self.cache.put(session) {
            self.flush_evicted(evicted);
        }
    }

    fn flush_evicted(&mut self, mut evicted: DocumentSession) {
        if !evicted.is_dirty() {
            return;
        }
        if let Err(err) = self.save_detached(&mut evicted) {
            warn!("coordinator: could not flush evicted {}: {err}", evicted.path());
            self.surrender(evicted);
        }
    }

    fn surrender(&mut self, session: DocumentSession) {
        if session.is_dirty() {
            self.notices.push(Notice::EvictedUnsaved {
                path: session.path().clone(),
                content: session.content().to_owned(),
            });
        }
    }

    fn save_active_inner(&mut self, announce_large: bool) -> Result<SaveReport, SaveError> {
        let Some(active) = self.active.as_ref() else {
            return Ok(SaveReport::Unchanged);
        };
        if !active.is_dirty() {
            return Ok(SaveReport::Unchanged);
        }
        let path = active.path().clone();
        let content = active.content().to_owned();
        let format = *active.disk().format();

        if announce_large && content.len() > self.config.large_document_bytes {
            self.notices.push(Notice::SavingLargeDocument {
                path: path.clone(),
                bytes: content.len(),
            });
        }

        let (saved, snapshot) = self.run_save(&path, content, format)?;
        if let Some(active) = self.active.as_mut().filter(|a| a.path() == &path) {
            active.mark_saved(saved, snapshot);
        }
        Ok(SaveReport::Saved)
    }

    fn save_detached(&mut self, session: &mut DocumentSession) -> Result<(), SaveError> {
        let path = session.path().clone();
        let format = *session.disk().format();
        let (saved, snapshot) = self.run_save(&path, session.content().to_owned(), format)?;
        session.mark_saved(saved, snapshot);
        Ok(())
    }

    fn run_save(
        &mut self,
        path: &NormalizedPath,
        content: String,
        format: DocumentFormat,
    ) -> Result<(String, DiskSnapshot), SaveError> {
        let ticket = self.saves.request(path, content, format, self.clock.now());
        let result = self
            .store
            .write_document(&ticket.path, &ticket.content, &ticket.format);
        match self.saves.complete(ticket, result, self.clock.now()) {
            SaveOutcome::Saved { content, snapshot } => Ok((content, snapshot)),
            SaveOutcome::Failed(err) => Err(err),
        }
    }

    fn run_autosave(&mut self, path: &NormalizedPath) {
        let Some(active) = self.active.as_ref().filter(|a| a.path() == path) else {
            return;
        };
        if active.in_conflict() {
            debug!("autosave: {path} is in conflict, waiting for the user");
            return;
        }
        if let Err(err) = self.save_active_inner(false) {
            warn!("autosave: {path} failed: {err}");
            self.notices.push(Notice::AutosaveFailed {
                path: path.clone(),
                error: err.to_string(),
            });
        }
    }

    fn finish_window(&mut self, closed: ClosedWindow) {
        let ClosedWindow {
            path,
            succeeded,
            written,
            attempted,
            replay,
        } = closed;

        // 逾時的寫入也可能已落地，其回音同樣要過濾。 / A timed-out write may still have landed; its echo is filtered too.
        let ours = written.as_ref().or(attempted.as_ref());
        let mut on_disk: Option<Option<DiskSnapshot>> = None;
        for change in replay {
            let echo_candidate = change.path == path && change.rewrites_content();
            if let (true, Some(ours)) = (echo_candidate, ours) {
                let current = on_disk.get_or_insert_with(|| {
                    self.store
                        .read_document(&path)
                        .ok()
                        .map(|loaded| loaded.snapshot)
                });
                if current.as_ref().is_some_and(|disk| disk.matches(ours)) {
                    debug!("coordinator: dropped echo of our own save for {path}");
                    continue;
                }
            }
            self.dispatch_change(change);
        }

        if succeeded && self.cache.get(&path).is_some_and(|cached| !cached.is_dirty()) {
            self.cache.invalidate(&path);
        }
    }

    fn dispatch_change(&mut self, change: ExternalChange) {
        let window_open = change
            .affected_paths()
            .into_iter()
            .any(|path| self.saves.is_open(path));

        match decide(&change, window_open, self.active.as_ref()) {
            BridgeDecision::Defer => {
                self.saves.defer(change);
                return;
            }
            BridgeDecision::Conflict => {
                warn!("coordinator: {} changed on disk while edited locally", change.path);
                if let Some(active) = self.active.as_mut() {
                    active.set_conflict(true);
                }
                self.notices.push(Notice::Conflict {
                    path: change.path.clone(),
                });
            }
            BridgeDecision::Reload => self.reload_active(&change.path),
            BridgeDecision::ActiveRemoved => {
                if let Some(path) = self.active_path().cloned() {
                    info!("coordinator: active document {path} removed from disk");
                    self.notices.push(Notice::ActiveRemoved { path });
                }
            }
            BridgeDecision::Invalidate => {}
        }

        for path in change.affected_paths() {
            if let Some(dropped) = self.cache.invalidate(path) {
                if dropped.is_dirty() {
                    self.notices.push(Notice::CachedEditsDiscarded {
                        path: path.clone(),
                        content: dropped.content().to_owned(),
                    });
                }
            }
        }

        if let Some(root) = self.root.as_ref() {
            self.refresh.refresh(root);
        }
    }

    fn reload_active(&mut self, path: &NormalizedPath) {
        let now = self.clock.now();
        match self.store.read_document(path) {
            Ok(loaded) => {
                if let Some(active) = self.active.as_mut() {
                    active.replace_from_disk(loaded, now);
                }
                self.autosave.cancel_for(path);
                info!("coordinator: reloaded {path} from disk");
                self.notices.push(Notice::Reloaded { path: path.clone() });
            }
            Err(ReadError::NotFound { .. }) => {
                self.notices
                    .push(Notice::ActiveRemoved { path: path.clone() });
            }
            // 重新載入失敗時保留原工作階段。 / A failed reload leaves the session untouched.
            Err(err) => warn!("coordinator: reload of {path} failed: {err}"),
        }
    }
}
