use std::fmt;
use std::path::{Path, PathBuf};

/// 正規化後的檔案路徑，作為快取與比較的唯一鍵值。 / Canonical path key shared by the cache, the save tracker and the watcher.
///
/// Separators are unified to `/`, repeated separators and `.` segments are
/// collapsed and trailing separators are dropped, so a path coming from the
/// watcher compares equal to the same path picked in the UI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    /// 由任意路徑建立正規化路徑。 / Normalises any path-like value.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::from_raw(&path.as_ref().to_string_lossy())
    }

    /// 直接處理字串形式的路徑。 / Normalises a raw string path.
    pub fn from_raw(raw: &str) -> Self {
        let unified = raw.replace('\\', "/");
        let absolute = unified.starts_with('/');

        let segments: Vec<&str> = unified
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();

        let mut normalized = String::with_capacity(unified.len());
        if absolute {
            normalized.push('/');
        }
        normalized.push_str(&segments.join("/"));
        if normalized.is_empty() {
            normalized.push('.');
        }
        Self(normalized)
    }

    /// 取得字串表示。 / Returns the normalised string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 轉為作業系統路徑。 / Converts back into an OS path for I/O.
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Path> for NormalizedPath {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for NormalizedPath {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&str> for NormalizedPath {
    fn from(raw: &str) -> Self {
        Self::from_raw(raw)
    }
}
