pub mod preferences;

pub use preferences::{
    AutosavePreferences, CachePreferences, Preferences, PreferencesError, PreferencesStore,
    SavePreferences, WatcherPreferences,
};
