//! Session cache and autosave coordination for RustNotes.
//! RustNotes 的文件工作階段快取與自動儲存協調核心。

pub mod autosave;
pub mod bridge;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod path;
pub mod save;
pub mod session;
pub mod store;
pub mod watcher;

pub use autosave::{AutosaveScheduler, AutosaveState};
pub use bridge::{decide, BridgeDecision, ChangeKind, ExternalChange};
pub use cache::SessionCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{CodecError, DecodedText, DocumentFormat, LineEnding, TextEncoding};
pub use config::CoordinatorConfig;
pub use coordinator::{NoteCoordinator, Notice, SaveReport, SelectOutcome};
pub use error::{CoordinatorError, ReadError, SaveError, WriteError};
pub use path::NormalizedPath;
pub use save::{ClosedWindow, SaveCoordinator, SaveOutcome, SaveTicket};
pub use session::{DiskSnapshot, DocumentSession, LoadedDocument};
pub use store::{DirectoryRefresh, DocumentStore, FsDocumentStore};
pub use watcher::{ChangeDebouncer, DirectoryWatcher, WatcherError};
