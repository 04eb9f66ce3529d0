use log::debug;
use rustnotes_core::config::{
    CoordinatorConfig, DEFAULT_AUTOSAVE_DELAY, DEFAULT_CACHE_CAPACITY,
    DEFAULT_LARGE_DOCUMENT_BYTES, DEFAULT_SAVE_GRACE_PERIOD, DEFAULT_SAVE_TIMEOUT,
    DEFAULT_WATCHER_DEBOUNCE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const PREFERENCES_VERSION: u32 = 1;

const MIN_AUTOSAVE_DELAY_MS: u64 = 100;
const MAX_AUTOSAVE_DELAY_MS: u64 = 60_000;
const MAX_SAVE_TIMEOUT_SECS: u64 = 300;
const MAX_GRACE_PERIOD_MS: u64 = 120_000;
const MAX_CACHE_CAPACITY: usize = 100;
const MIN_DEBOUNCE_MS: u64 = 50;
const MAX_DEBOUNCE_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse preferences {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 使用者偏好設定。 / Persisted user preferences for the note coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub autosave: AutosavePreferences,
    #[serde(default)]
    pub saving: SavePreferences,
    #[serde(default)]
    pub cache: CachePreferences,
    #[serde(default)]
    pub watcher: WatcherPreferences,
}

fn default_version() -> u32 {
    PREFERENCES_VERSION
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            autosave: AutosavePreferences::default(),
            saving: SavePreferences::default(),
            cache: CachePreferences::default(),
            watcher: WatcherPreferences::default(),
        }
    }
}

impl Preferences {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = PREFERENCES_VERSION;
        }
        self.autosave.sanitize();
        self.cache.sanitize();
        self.watcher.sanitize();
        self.saving.sanitize(self.watcher.debounce_ms);
    }

    /// 轉為協調者設定。 / Converts into the coordinator's runtime configuration.
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            autosave_enabled: self.autosave.enabled,
            autosave_delay: Duration::from_millis(self.autosave.delay_ms),
            save_timeout: Duration::from_secs(self.saving.timeout_secs),
            save_grace_period: Duration::from_millis(self.saving.grace_period_ms),
            cache_capacity: self.cache.capacity,
            large_document_bytes: self.cache.large_document_kib.saturating_mul(1024),
            watcher_debounce: Duration::from_millis(self.watcher.debounce_ms),
            park_dirty_on_switch: self.cache.park_dirty_on_switch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosavePreferences {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_autosave_delay_ms")]
    pub delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_autosave_delay_ms() -> u64 {
    DEFAULT_AUTOSAVE_DELAY.as_millis() as u64
}

impl Default for AutosavePreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: default_autosave_delay_ms(),
        }
    }
}

impl AutosavePreferences {
    fn sanitize(&mut self) {
        if self.delay_ms == 0 {
            self.delay_ms = default_autosave_delay_ms();
        }
        self.delay_ms = self
            .delay_ms
            .clamp(MIN_AUTOSAVE_DELAY_MS, MAX_AUTOSAVE_DELAY_MS);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePreferences {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_SAVE_TIMEOUT.as_secs()
}

fn default_grace_period_ms() -> u64 {
    DEFAULT_SAVE_GRACE_PERIOD.as_millis() as u64
}

impl Default for SavePreferences {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl SavePreferences {
    fn sanitize(&mut self, debounce_ms: u64) {
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        self.timeout_secs = self.timeout_secs.min(MAX_SAVE_TIMEOUT_SECS);

        // 寬限期必須長於監看器去抖動時間。 / The grace period must outlast the watcher debounce.
        let margin = default_grace_period_ms() - default_debounce_ms();
        let floor = debounce_ms + margin;
        if self.grace_period_ms < floor {
            debug!(
                "preferences: grace period raised from {}ms to {floor}ms",
                self.grace_period_ms
            );
            self.grace_period_ms = floor;
        }
        self.grace_period_ms = self.grace_period_ms.min(MAX_GRACE_PERIOD_MS.max(floor));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePreferences {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub park_dirty_on_switch: bool,
    #[serde(default = "default_large_document_kib")]
    pub large_document_kib: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_large_document_kib() -> usize {
    DEFAULT_LARGE_DOCUMENT_BYTES / 1024
}

impl Default for CachePreferences {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            park_dirty_on_switch: false,
            large_document_kib: default_large_document_kib(),
        }
    }
}

impl CachePreferences {
    fn sanitize(&mut self) {
        self.capacity = self.capacity.clamp(1, MAX_CACHE_CAPACITY);
        if self.large_document_kib == 0 {
            self.large_document_kib = default_large_document_kib();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherPreferences {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_WATCHER_DEBOUNCE.as_millis() as u64
}

impl Default for WatcherPreferences {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl WatcherPreferences {
    fn sanitize(&mut self) {
        self.debounce_ms = self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
    }
}

/// 偏好設定檔的讀寫。 / Loads and atomically persists the preferences file.
#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    data: Preferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>, preferences: Preferences) -> Self {
        let mut data = preferences;
        data.sanitize();
        Self {
            path: path.into(),
            data,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut data = Preferences::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let contents = fs::read_to_string(&path).map_err(|source| PreferencesError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: Preferences =
            serde_json::from_str(&contents).map_err(|source| PreferencesError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    pub fn preferences(&self) -> &Preferences {
        &self.data
    }

    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        self.data.to_coordinator_config()
    }

    pub fn update<F>(&mut self, mut op: F) -> Result<(), PreferencesError>
    where
        F: FnMut(&mut Preferences),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn overwrite(&mut self, preferences: Preferences) -> Result<(), PreferencesError> {
        self.data = preferences;
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PreferencesError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            PreferencesError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| PreferencesError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| PreferencesError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
