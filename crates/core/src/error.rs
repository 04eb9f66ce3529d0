use std::io::{self, ErrorKind};
use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::path::NormalizedPath;

/// 讀取文件失敗。 / Failure to load a document from disk.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{path} does not exist")]
    NotFound { path: NormalizedPath },
    #[error("permission denied while reading {path}")]
    PermissionDenied { path: NormalizedPath },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: NormalizedPath,
        #[source]
        source: CodecError,
    },
    #[error("I/O error while reading {path}: {source}")]
    Io {
        path: NormalizedPath,
        #[source]
        source: io::Error,
    },
}

impl ReadError {
    pub fn from_io(path: &NormalizedPath, source: io::Error) -> Self {
        let path = path.clone();
        match source.kind() {
            ErrorKind::NotFound => ReadError::NotFound { path },
            ErrorKind::PermissionDenied => ReadError::PermissionDenied { path },
            _ => ReadError::Io { path, source },
        }
    }

    pub fn path(&self) -> &NormalizedPath {
        match self {
            ReadError::NotFound { path }
            | ReadError::PermissionDenied { path }
            | ReadError::Decode { path, .. }
            | ReadError::Io { path, .. } => path,
        }
    }
}

/// 寫入文件失敗。 / Failure to persist a document.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("permission denied while writing {path}")]
    PermissionDenied { path: NormalizedPath },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: NormalizedPath,
        #[source]
        source: CodecError,
    },
    #[error("I/O error while writing {path}: {source}")]
    Io {
        path: NormalizedPath,
        #[source]
        source: io::Error,
    },
}

impl WriteError {
    pub fn from_io(path: &NormalizedPath, source: io::Error) -> Self {
        let path = path.clone();
        match source.kind() {
            ErrorKind::PermissionDenied => WriteError::PermissionDenied { path },
            _ => WriteError::Io { path, source },
        }
    }
}

/// 儲存流程的結果錯誤。 / Outcome of a save that did not confirm persistence.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Write(#[from] WriteError),
    /// 寫入超過時間預算，磁碟狀態不確定。 / The write overran its budget; disk state is indeterminate.
    #[error("saving {path} exceeded {budget:?}")]
    Timeout {
        path: NormalizedPath,
        budget: Duration,
    },
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Save(#[from] SaveError),
    /// 切換前儲存失敗，仍停留在原文件。 / Saving the outgoing document failed; the switch was aborted.
    #[error("cannot leave {path} because it could not be saved: {source}")]
    SwitchBlocked {
        path: NormalizedPath,
        #[source]
        source: SaveError,
    },
    #[error("no document is active")]
    NoActiveDocument,
}
