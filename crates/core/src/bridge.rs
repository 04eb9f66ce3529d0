//! External change bridge: decides what a debounced watcher notification
//! means for the documents we hold.
//! 外部變更橋接：判斷監看通知對目前文件的影響。

use std::time::Instant;

use crate::path::NormalizedPath;
use crate::session::DocumentSession;

/// 監看到的變更種類。 / Kind of change reported by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Modified,
    Created,
    Removed,
    /// `path` 為新路徑。 / `path` holds the destination.
    Renamed { from: NormalizedPath },
}

/// 去抖動後的單一變更通知。 / One debounced, coalesced change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalChange {
    pub path: NormalizedPath,
    pub kind: ChangeKind,
    pub observed_at: Instant,
}

impl ExternalChange {
    pub fn new(path: NormalizedPath, kind: ChangeKind, observed_at: Instant) -> Self {
        Self {
            path,
            kind,
            observed_at,
        }
    }

    /// 受影響的所有路徑（改名時含來源）。 / Every path this change touches, including a rename source.
    pub fn affected_paths(&self) -> Vec<&NormalizedPath> {
        match &self.kind {
            ChangeKind::Renamed { from } => vec![from, &self.path],
            _ => vec![&self.path],
        }
    }

    pub fn touches(&self, path: &NormalizedPath) -> bool {
        self.affected_paths().into_iter().any(|affected| affected == path)
    }

    /// 內容可能被改寫（而非刪除）。 / Content may have been rewritten in place.
    pub fn rewrites_content(&self) -> bool {
        matches!(self.kind, ChangeKind::Modified | ChangeKind::Created)
    }
}

/// 處理單一通知的決策。 / What to do with one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeDecision {
    /// 儲存視窗開啟中，排入待處理佇列。 / A save window is open; queue it for replay.
    Defer,
    /// 作用中文件有未儲存編輯，不覆蓋，只警告。 / Active document is dirty; warn, never overwrite.
    Conflict,
    /// 作用中文件乾淨，從磁碟重新載入。 / Active document is clean; reload from disk.
    Reload,
    /// 作用中文件被刪除或移走。 / Active document was deleted or moved away.
    ActiveRemoved,
    /// 與作用中文件無關，只需讓快取失效。 / Not the active document; invalidate only.
    Invalidate,
}

/// 依序判斷：儲存視窗、路徑是否相符、是否有未儲存編輯。 / Save window first, then path identity, then dirtiness.
///
/// Cache invalidation and the directory refresh happen for every decision
/// except [`BridgeDecision::Defer`]; that part is up to the caller.
pub fn decide(
    change: &ExternalChange,
    save_window_open: bool,
    active: Option<&DocumentSession>,
) -> BridgeDecision {
    if save_window_open {
        return BridgeDecision::Defer;
    }

    let Some(active) = active else {
        return BridgeDecision::Invalidate;
    };

    if let ChangeKind::Renamed { from } = &change.kind {
        if from == active.path() && &change.path != active.path() {
            return BridgeDecision::ActiveRemoved;
        }
    }

    if &change.path != active.path() {
        return BridgeDecision::Invalidate;
    }

    match change.kind {
        ChangeKind::Removed => BridgeDecision::ActiveRemoved,
        _ if active.is_dirty() => BridgeDecision::Conflict,
        _ => BridgeDecision::Reload,
    }
}
