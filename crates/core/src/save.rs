use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::bridge::ExternalChange;
use crate::codec::DocumentFormat;
use crate::error::{SaveError, WriteError};
use crate::path::NormalizedPath;
use crate::session::DiskSnapshot;

/// 一次實際寫入的請求。 / One write that is allowed to hit the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTicket {
    pub path: NormalizedPath,
    /// 儲存開始當下的內容。 / Content captured when the save began.
    pub content: String,
    pub format: DocumentFormat,
    pub started_at: Instant,
}

#[derive(Debug)]
pub enum SaveOutcome {
    Saved {
        content: String,
        snapshot: DiskSnapshot,
    },
    Failed(SaveError),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }
}

/// 已關閉的儲存視窗，以及期間累積的外部事件。 / A closed save window plus the events it held back.
#[derive(Debug)]
pub struct ClosedWindow {
    pub path: NormalizedPath,
    pub succeeded: bool,
    /// 最後一次成功寫入的位元組，用於辨識回音事件。 / Bytes of the last successful write, used to recognise echoes.
    pub written: Option<DiskSnapshot>,
    /// 逾時但已回報落地的位元組；只用於辨識回音。 / Bytes of a timed-out write the store still reported; only used for echo matching.
    pub attempted: Option<DiskSnapshot>,
    /// 依到達順序排列。 / In arrival order.
    pub replay: Vec<ExternalChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowPhase {
    Writing,
    Grace { closes_at: Instant },
}

#[derive(Debug)]
struct SaveWindow {
    phase: WindowPhase,
    succeeded: bool,
    written: Option<DiskSnapshot>,
    attempted: Option<DiskSnapshot>,
}

impl SaveWindow {
    fn writing() -> Self {
        Self {
            phase: WindowPhase::Writing,
            succeeded: false,
            written: None,
            attempted: None,
        }
    }
}

/// 序列化寫入並維護儲存視窗。 / Serialises writes per path and owns the save windows.
///
/// A window opens right before the write starts and stays open for the grace
/// period after it completes. Watcher events for a path with an open window
/// are parked in a FIFO and handed back exactly once when the window closes.
/// Writes run on the caller's thread between [`SaveCoordinator::request`] and
/// [`SaveCoordinator::complete`], so a path never has two writes in flight; a
/// request during the grace period reopens the same window.
#[derive(Debug)]
pub struct SaveCoordinator {
    timeout: Duration,
    grace: Duration,
    windows: HashMap<NormalizedPath, SaveWindow>,
    pending: VecDeque<ExternalChange>,
}

impl SaveCoordinator {
    pub fn new(timeout: Duration, grace: Duration) -> Self {
        Self {
            timeout,
            grace,
            windows: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// 開啟（或重新開啟）儲存視窗並發出寫入票。 / Opens or reopens the path's window and hands out the write ticket.
    pub fn request(
        &mut self,
        path: &NormalizedPath,
        content: String,
        format: DocumentFormat,
        now: Instant,
    ) -> SaveTicket {
        match self.windows.get_mut(path) {
            Some(window) => window.phase = WindowPhase::Writing,
            None => {
                self.windows.insert(path.clone(), SaveWindow::writing());
            }
        }
        debug!("save: window opened for {path}");
        SaveTicket {
            path: path.clone(),
            content,
            format,
            started_at: now,
        }
    }

    /// 回報寫入結果並進入寬限期。 / Records a write result and starts the grace period.
    ///
    /// A write that overran the budget is reported as [`SaveError::Timeout`]
    /// even if the store returned success; the bytes it reported are kept as
    /// `attempted` so the echo of that write can still be recognised.
    pub fn complete(
        &mut self,
        ticket: SaveTicket,
        result: Result<DiskSnapshot, WriteError>,
        now: Instant,
    ) -> SaveOutcome {
        let elapsed = now.saturating_duration_since(ticket.started_at);
        let timed_out = elapsed > self.timeout;

        let window = self
            .windows
            .entry(ticket.path.clone())
            .or_insert_with(SaveWindow::writing);
        window.phase = WindowPhase::Grace {
            closes_at: now + self.grace,
        };

        let outcome = match result {
            Ok(snapshot) if timed_out => {
                window.succeeded = false;
                window.written = None;
                window.attempted = Some(snapshot);
                SaveOutcome::Failed(SaveError::Timeout {
                    path: ticket.path.clone(),
                    budget: self.timeout,
                })
            }
            Ok(snapshot) => {
                window.succeeded = true;
                window.written = Some(snapshot.clone());
                window.attempted = None;
                SaveOutcome::Saved {
                    content: ticket.content,
                    snapshot,
                }
            }
            Err(err) => {
                window.succeeded = false;
                window.written = None;
                window.attempted = None;
                if timed_out {
                    SaveOutcome::Failed(SaveError::Timeout {
                        path: ticket.path.clone(),
                        budget: self.timeout,
                    })
                } else {
                    SaveOutcome::Failed(err.into())
                }
            }
        };

        match &outcome {
            SaveOutcome::Saved { .. } => info!("save: {} persisted", ticket.path),
            SaveOutcome::Failed(err) => info!("save: {} failed: {err}", ticket.path),
        }
        outcome
    }

    /// 寫入中或仍在寬限期內。 / Writing, or still inside the grace period.
    pub fn is_open(&self, path: &NormalizedPath) -> bool {
        self.windows.contains_key(path)
    }

    pub fn is_writing(&self, path: &NormalizedPath) -> bool {
        self.windows
            .get(path)
            .is_some_and(|window| window.phase == WindowPhase::Writing)
    }

    /// 暫存視窗開啟期間的外部事件。 / Parks an event that arrived while a window was open.
    pub fn defer(&mut self, change: ExternalChange) {
        debug!("save: deferring external change for {}", change.path);
        self.pending.push_back(change);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 最早的寬限期結束時間。 / Earliest grace-period deadline.
    pub fn deadline(&self) -> Option<Instant> {
        self.windows
            .values()
            .filter_map(|window| match window.phase {
                WindowPhase::Grace { closes_at } => Some(closes_at),
                WindowPhase::Writing => None,
            })
            .min()
    }

    /// 關閉所有到期的視窗並交出各自的待處理事件。 / Closes every expired window and hands back its parked events.
    pub fn close_expired(&mut self, now: Instant) -> Vec<ClosedWindow> {
        let mut expired: Vec<(Instant, NormalizedPath)> = self
            .windows
            .iter()
            .filter_map(|(path, window)| match window.phase {
                WindowPhase::Grace { closes_at } if closes_at <= now => {
                    Some((closes_at, path.clone()))
                }
                _ => None,
            })
            .collect();
        expired.sort();

        let mut closed = Vec::with_capacity(expired.len());
        for (_, path) in expired {
            let Some(window) = self.windows.remove(&path) else {
                continue;
            };
            let replay = self.drain_pending(&path);
            debug!(
                "save: window closed for {path} ({} event(s) to replay)",
                replay.len()
            );
            closed.push(ClosedWindow {
                path,
                succeeded: window.succeeded,
                written: window.written,
                attempted: window.attempted,
                replay,
            });
        }
        closed
    }

    /// 丟棄所有視窗與待處理事件，例如切換根目錄時。 / Drops every window and parked event, e.g. when the notes root changes.
    pub fn clear(&mut self) {
        if !self.windows.is_empty() || !self.pending.is_empty() {
            debug!(
                "save: dropping {} window(s) and {} parked event(s)",
                self.windows.len(),
                self.pending.len()
            );
        }
        self.windows.clear();
        self.pending.clear();
    }

    fn drain_pending(&mut self, path: &NormalizedPath) -> Vec<ExternalChange> {
        let mut replay = Vec::new();
        let mut keep = VecDeque::with_capacity(self.pending.len());
        while let Some(change) = self.pending.pop_front() {
            if change.touches(path) {
                replay.push(change);
            } else {
                keep.push_back(change);
            }
        }
        self.pending = keep;
        replay
    }
}
