use std::time::{Duration, Instant};

use log::debug;

use crate::path::NormalizedPath;

/// 自動儲存狀態機。 / Debounce state of the active document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveState {
    Idle,
    PendingSave { path: NormalizedPath, due_at: Instant },
}

/// 以固定閒置時間去抖動的自動儲存排程。 / Fixed-delay debounce timer for the active document.
///
/// Only the most recent edit inside the idle window survives; every new edit
/// pushes the deadline out again.
#[derive(Debug)]
pub struct AutosaveScheduler {
    delay: Duration,
    state: AutosaveState,
}

impl AutosaveScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: AutosaveState::Idle,
        }
    }

    pub fn state(&self) -> &AutosaveState {
        &self.state
    }

    /// 每次編輯後呼叫，重設計時器。 / Call after every edit; restarts the timer.
    pub fn schedule(&mut self, path: &NormalizedPath, now: Instant) {
        let due_at = now + self.delay;
        if matches!(&self.state, AutosaveState::PendingSave { path: pending, .. } if pending == path)
        {
            debug!("autosave: debounce reset for {path}");
        }
        self.state = AutosaveState::PendingSave {
            path: path.clone(),
            due_at,
        };
    }

    /// 取消任何待執行的儲存。 / Drops the pending timer, if any.
    pub fn cancel(&mut self) -> Option<NormalizedPath> {
        match std::mem::replace(&mut self.state, AutosaveState::Idle) {
            AutosaveState::PendingSave { path, .. } => {
                debug!("autosave: cancelled pending save for {path}");
                Some(path)
            }
            AutosaveState::Idle => None,
        }
    }

    /// 只取消指定路徑的計時器。 / Cancels the timer only when it belongs to `path`.
    pub fn cancel_for(&mut self, path: &NormalizedPath) -> bool {
        if self.pending_path() == Some(path) {
            self.cancel();
            true
        } else {
            false
        }
    }

    pub fn pending_path(&self) -> Option<&NormalizedPath> {
        match &self.state {
            AutosaveState::PendingSave { path, .. } => Some(path),
            AutosaveState::Idle => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            AutosaveState::PendingSave { due_at, .. } => Some(*due_at),
            AutosaveState::Idle => None,
        }
    }

    /// 計時器到期時回傳要儲存的路徑並回到閒置。 / Returns the path to save once the timer has fired, going back to idle.
    pub fn poll(&mut self, now: Instant) -> Option<NormalizedPath> {
        match self.deadline() {
            Some(due_at) if now >= due_at => self.cancel(),
            _ => None,
        }
    }
}
