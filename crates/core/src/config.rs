use std::time::Duration;

pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SAVE_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_WATCHER_DEBOUNCE: Duration = Duration::from_secs(3);
pub const DEFAULT_CACHE_CAPACITY: usize = 10;
pub const DEFAULT_LARGE_DOCUMENT_BYTES: usize = 256 * 1024;

/// 協調器的可調整參數。 / Tunables exposed to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub autosave_enabled: bool,
    /// 最後一次編輯後到自動儲存的閒置時間。 / Idle time after the last edit before autosave fires.
    pub autosave_delay: Duration,
    pub save_timeout: Duration,
    /// 儲存完成後仍視監看事件為自身造成的時間。 / How long watcher events stay attributed to our own save.
    pub save_grace_period: Duration,
    pub cache_capacity: usize,
    /// 只影響提示訊息，不影響流程。 / Only affects the "saving" notice, never control flow.
    pub large_document_bytes: usize,
    pub watcher_debounce: Duration,
    /// 切換時保留未儲存的文件於快取，而非先行儲存。 / Park dirty documents in the cache on switch instead of saving first.
    pub park_dirty_on_switch: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            autosave_enabled: true,
            autosave_delay: DEFAULT_AUTOSAVE_DELAY,
            save_timeout: DEFAULT_SAVE_TIMEOUT,
            save_grace_period: DEFAULT_SAVE_GRACE_PERIOD,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            large_document_bytes: DEFAULT_LARGE_DOCUMENT_BYTES,
            watcher_debounce: DEFAULT_WATCHER_DEBOUNCE,
            park_dirty_on_switch: false,
        }
    }
}
