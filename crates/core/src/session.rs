use std::time::Instant;

use crate::codec::{self, CodecError, DocumentFormat};
use crate::path::NormalizedPath;

/// 最後一次在磁碟上觀察到的原始位元組。 / Raw bytes last observed on disk.
///
/// Used only to decide whether a cached session is still fresh; the editable
/// baseline lives in [`DocumentSession::original_content`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiskSnapshot {
    bytes: Vec<u8>,
    format: DocumentFormat,
}

impl DiskSnapshot {
    pub fn new(bytes: Vec<u8>, format: DocumentFormat) -> Self {
        Self { bytes, format }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> &DocumentFormat {
        &self.format
    }

    pub fn matches(&self, other: &DiskSnapshot) -> bool {
        self.bytes == other.bytes
    }
}

/// 從磁碟讀入的文件。 / A document as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub text: String,
    pub snapshot: DiskSnapshot,
}

impl LoadedDocument {
    /// 解碼原始位元組並保留快照。 / Decodes raw bytes while keeping them as the snapshot.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CodecError> {
        let decoded = codec::decode(&bytes)?;
        Ok(Self {
            text: decoded.text,
            snapshot: DiskSnapshot::new(bytes, decoded.format),
        })
    }
}

/// 快取中的工作階段重新驗證後的結果。 / Result of validating a cached session against disk.
#[derive(Debug)]
pub enum Revalidated {
    /// 磁碟未變，保留快取內容（含未儲存的編輯）。 / Disk unchanged; cached content and edits are kept.
    Restored(DocumentSession),
    /// 磁碟已變，以磁碟內容為準。 / Disk changed out-of-band; disk wins.
    Replaced {
        session: DocumentSession,
        /// 被捨棄的未儲存內容。 / Unsaved content that was dropped, if any.
        dropped_edits: Option<String>,
    },
}

/// 單一開啟檔案的可編輯狀態。 / Live editable state for one open file.
#[derive(Debug, Clone)]
pub struct DocumentSession {
    path: NormalizedPath,
    content: String,
    original_content: String,
    disk: DiskSnapshot,
    last_touched: Instant,
    in_conflict: bool,
}

impl DocumentSession {
    pub fn open(path: NormalizedPath, loaded: LoadedDocument, now: Instant) -> Self {
        Self {
            path,
            content: loaded.text.clone(),
            original_content: loaded.text,
            disk: loaded.snapshot,
            last_touched: now,
            in_conflict: false,
        }
    }

    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn original_content(&self) -> &str {
        &self.original_content
    }

    pub fn disk(&self) -> &DiskSnapshot {
        &self.disk
    }

    pub fn last_touched(&self) -> Instant {
        self.last_touched
    }

    pub fn is_dirty(&self) -> bool {
        self.content != self.original_content
    }

    /// 磁碟內容與未儲存編輯衝突中。 / Disk changed while local edits were unsaved.
    pub fn in_conflict(&self) -> bool {
        self.in_conflict
    }

    pub(crate) fn set_conflict(&mut self, in_conflict: bool) {
        self.in_conflict = in_conflict;
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_touched = now;
    }

    /// 套用編輯；回傳內容是否真的改變。 / Applies an edit and reports whether the text actually changed.
    pub fn edit(&mut self, content: impl Into<String>, now: Instant) -> bool {
        let content = codec::normalize_newlines(&content.into());
        self.last_touched = now;
        if content == self.content {
            return false;
        }
        self.content = content;
        true
    }

    /// 以儲存當下的內容作為新基準。 / Moves the baseline to the content captured when the save began.
    ///
    /// Edits made while the write was in flight stay dirty against the new
    /// baseline.
    pub fn mark_saved(&mut self, saved_content: String, disk: DiskSnapshot) {
        self.original_content = saved_content;
        self.disk = disk;
        self.in_conflict = false;
    }

    /// 以磁碟內容覆蓋記憶體。 / Replaces both content and baseline with disk content.
    pub fn replace_from_disk(&mut self, loaded: LoadedDocument, now: Instant) {
        self.content = loaded.text.clone();
        self.original_content = loaded.text;
        self.disk = loaded.snapshot;
        self.last_touched = now;
        self.in_conflict = false;
    }

    /// 與剛讀入的磁碟內容比對後決定是否沿用快取。 / Decides whether this cached session survives a fresh disk read.
    pub fn revalidate(mut self, fresh: LoadedDocument, now: Instant) -> Revalidated {
        if self.disk.matches(&fresh.snapshot) {
            self.last_touched = now;
            return Revalidated::Restored(self);
        }
        let dropped_edits = self.is_dirty().then(|| self.content.clone());
        self.replace_from_disk(fresh, now);
        Revalidated::Replaced {
            session: self,
            dropped_edits,
        }
    }
}
