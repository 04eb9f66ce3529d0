use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use rustnotes_core::{
    ChangeKind, Clock, CoordinatorConfig, CoordinatorError, DirectoryRefresh, DiskSnapshot,
    DocumentFormat, DocumentStore, ExternalChange, LoadedDocument, ManualClock, NormalizedPath,
    NoteCoordinator, Notice, ReadError, SaveError, SaveReport, SelectOutcome, WriteError,
};

/// 記憶體中的磁碟替身。 / In-memory stand-in for the disk.
struct FakeStore {
    clock: ManualClock,
    files: HashMap<NormalizedPath, Vec<u8>>,
    writes: Vec<(NormalizedPath, String)>,
    reads: usize,
    fail_writes: bool,
    write_delay: Duration,
}

impl FakeStore {
    fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            files: HashMap::new(),
            writes: Vec::new(),
            reads: 0,
            fail_writes: false,
            write_delay: Duration::ZERO,
        }
    }

    fn put(&mut self, path: &str, text: &str) {
        self.files
            .insert(NormalizedPath::from(path), text.as_bytes().to_vec());
    }

    fn text(&self, path: &str) -> Option<String> {
        self.files
            .get(&NormalizedPath::from(path))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl DocumentStore for FakeStore {
    fn read_document(&mut self, path: &NormalizedPath) -> Result<LoadedDocument, ReadError> {
        self.reads += 1;
        let bytes = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ReadError::NotFound { path: path.clone() })?;
        LoadedDocument::from_bytes(bytes).map_err(|source| ReadError::Decode {
            path: path.clone(),
            source,
        })
    }

    fn write_document(
        &mut self,
        path: &NormalizedPath,
        content: &str,
        format: &DocumentFormat,
    ) -> Result<DiskSnapshot, WriteError> {
        self.clock.advance(self.write_delay);
        if self.fail_writes {
            return Err(WriteError::from_io(
                path,
                io::Error::new(io::ErrorKind::Other, "disk full"),
            ));
        }
        self.writes.push((path.clone(), content.to_owned()));
        self.files.insert(path.clone(), content.as_bytes().to_vec());
        Ok(DiskSnapshot::new(content.as_bytes().to_vec(), *format))
    }
}

#[derive(Clone, Default)]
struct RefreshLog(Rc<RefCell<Vec<NormalizedPath>>>);

impl RefreshLog {
    fn count(&self) -> usize {
        self.0.borrow().len()
    }
}

impl DirectoryRefresh for RefreshLog {
    fn refresh(&mut self, root: &NormalizedPath) {
        self.0.borrow_mut().push(root.clone());
    }
}

type Harness = NoteCoordinator<FakeStore, RefreshLog, ManualClock>;

struct Fixture {
    clock: ManualClock,
    refreshes: RefreshLog,
    coordinator: Harness,
}

fn fixture_with(config: CoordinatorConfig, files: &[(&str, &str)]) -> Fixture {
    let clock = ManualClock::new();
    let mut store = FakeStore::new(clock.clone());
    for (path, text) in files {
        store.put(path, text);
    }
    let refreshes = RefreshLog::default();
    let mut coordinator = NoteCoordinator::new(config, store, refreshes.clone(), clock.clone());
    coordinator.open_directory("/vault").expect("open root");
    Fixture {
        clock,
        refreshes,
        coordinator,
    }
}

fn fixture(files: &[(&str, &str)]) -> Fixture {
    fixture_with(CoordinatorConfig::default(), files)
}

fn modified(path: &str, fx: &Fixture) -> ExternalChange {
    ExternalChange::new(
        NormalizedPath::from(path),
        ChangeKind::Modified,
        fx.clock.now(),
    )
}

#[test]
fn burst_of_edits_triggers_exactly_one_save_with_final_content() {
    let mut fx = fixture(&[("/vault/a.md", "draft")]);
    fx.coordinator.select("/vault/a.md").unwrap();

    for step in 1..=5 {
        fx.coordinator.edit(format!("draft {step}")).unwrap();
        fx.clock.advance(Duration::from_millis(200));
        fx.coordinator.tick();
    }
    assert!(fx.coordinator.store().writes.is_empty());

    fx.clock.advance(Duration::from_millis(1000));
    fx.coordinator.tick();

    let writes = &fx.coordinator.store().writes;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1, "draft 5");
    assert!(!fx.coordinator.active().unwrap().is_dirty());
}

#[test]
fn failed_save_blocks_switch_and_keeps_edits() {
    let mut fx = fixture(&[("/vault/a.md", "a"), ("/vault/b.md", "b")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a with unsaved words").unwrap();
    fx.coordinator.store_mut().fail_writes = true;

    let err = fx.coordinator.select("/vault/b.md").unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::SwitchBlocked { ref path, source: SaveError::Write(_) }
            if path.as_str() == "/vault/a.md"
    ));

    let active = fx.coordinator.active().unwrap();
    assert_eq!(active.path().as_str(), "/vault/a.md");
    assert_eq!(active.content(), "a with unsaved words");
    assert!(active.is_dirty());
    assert!(!fx.coordinator.cache().contains(&NormalizedPath::from("/vault/b.md")));

    // 寫入恢復後可以正常切換。 / Once writes work again the switch goes through.
    fx.coordinator.store_mut().fail_writes = false;
    assert_eq!(
        fx.coordinator.select("/vault/b.md").unwrap(),
        SelectOutcome::Loaded
    );
    assert_eq!(
        fx.coordinator.store().text("/vault/a.md").as_deref(),
        Some("a with unsaved words")
    );
}

#[test]
fn cache_is_bounded_and_evicts_least_recently_touched() {
    let files: Vec<(String, String)> = (0..12)
        .map(|idx| (format!("/vault/{idx}.md"), format!("note {idx}")))
        .collect();
    let borrowed: Vec<(&str, &str)> = files
        .iter()
        .map(|(p, t)| (p.as_str(), t.as_str()))
        .collect();
    let mut fx = fixture(&borrowed);

    for (path, _) in &borrowed {
        fx.coordinator.select(path).unwrap();
        fx.clock.advance(Duration::from_millis(10));
        assert!(fx.coordinator.cache().len() <= 10);
    }

    let cache = fx.coordinator.cache();
    assert_eq!(cache.len(), 10);
    assert!(!cache.contains(&NormalizedPath::from("/vault/0.md")));
    assert!(cache.contains(&NormalizedPath::from("/vault/1.md")));
    assert!(!cache.contains(&NormalizedPath::from("/vault/11.md")));
}

#[test]
fn own_save_echo_is_suppressed_but_later_changes_reload() {
    let mut fx = fixture(&[("/vault/a.md", "v1")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("v2").unwrap();
    assert_eq!(fx.coordinator.save_active().unwrap(), SaveReport::Saved);

    let path = NormalizedPath::from("/vault/a.md");
    assert!(fx.coordinator.is_save_window_open(&path));
    let echo = modified("/vault/a.md", &fx);
    fx.coordinator.handle_external_change(echo);

    fx.clock.advance(fx.coordinator.config().save_grace_period);
    fx.coordinator.tick();
    assert!(!fx.coordinator.is_save_window_open(&path));
    assert!(fx.coordinator.take_notices().is_empty());
    assert_eq!(fx.coordinator.active().unwrap().content(), "v2");

    fx.coordinator.store_mut().put("/vault/a.md", "v3 from elsewhere");
    let later = modified("/vault/a.md", &fx);
    fx.coordinator.handle_external_change(later);

    assert_eq!(
        fx.coordinator.take_notices(),
        vec![Notice::Reloaded { path: path.clone() }]
    );
    let active = fx.coordinator.active().unwrap();
    assert_eq!(active.content(), "v3 from elsewhere");
    assert!(!active.is_dirty());
}

#[test]
fn foreign_write_during_save_window_is_replayed() {
    let mut fx = fixture(&[("/vault/a.md", "v1")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("v2").unwrap();
    fx.coordinator.save_active().unwrap();

    fx.coordinator.store_mut().put("/vault/a.md", "sync client wrote this");
    let change = modified("/vault/a.md", &fx);
    fx.coordinator.handle_external_change(change);
    assert!(fx.coordinator.take_notices().is_empty());

    fx.clock.advance(fx.coordinator.config().save_grace_period);
    fx.coordinator.tick();

    assert_eq!(
        fx.coordinator.take_notices(),
        vec![Notice::Reloaded {
            path: NormalizedPath::from("/vault/a.md")
        }]
    );
    assert_eq!(
        fx.coordinator.active().unwrap().content(),
        "sync client wrote this"
    );
}

#[test]
fn dirty_active_document_is_never_overwritten_by_external_change() {
    let mut fx = fixture(&[("/vault/a.md", "disk")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("local edits").unwrap();

    fx.coordinator.store_mut().put("/vault/a.md", "changed elsewhere");
    let change = modified("\\vault\\a.md", &fx);
    fx.coordinator.handle_external_change(change);

    let active = fx.coordinator.active().unwrap();
    assert_eq!(active.content(), "local edits");
    assert!(active.in_conflict());
    assert_eq!(
        fx.coordinator.take_notices(),
        vec![Notice::Conflict {
            path: NormalizedPath::from("/vault/a.md")
        }]
    );

    // 衝突期間自動儲存暫停。 / Autosave holds off while in conflict.
    fx.clock.advance(Duration::from_secs(2));
    fx.coordinator.tick();
    assert!(fx.coordinator.store().writes.is_empty());

    fx.coordinator.discard_changes().unwrap();
    let active = fx.coordinator.active().unwrap();
    assert_eq!(active.content(), "changed elsewhere");
    assert!(!active.in_conflict());
}

#[test]
fn cached_dirty_session_survives_round_trip_when_disk_is_unchanged() {
    let config = CoordinatorConfig {
        park_dirty_on_switch: true,
        ..CoordinatorConfig::default()
    };
    let mut fx = fixture_with(config, &[("/vault/a.md", "X"), ("/vault/b.md", "b")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("X plus local").unwrap();

    fx.coordinator.select("/vault/b.md").unwrap();
    assert!(fx.coordinator.cache().get(&NormalizedPath::from("/vault/a.md")).is_some());

    assert_eq!(
        fx.coordinator.select("/vault/a.md").unwrap(),
        SelectOutcome::Restored
    );
    let active = fx.coordinator.active().unwrap();
    assert_eq!(active.content(), "X plus local");
    assert!(active.is_dirty());
    assert!(fx.coordinator.store().writes.is_empty());
    assert!(!fx.coordinator.cache().contains(&NormalizedPath::from("/vault/a.md")));
}

#[test]
fn cached_session_yields_to_disk_when_it_changed_in_between() {
    let config = CoordinatorConfig {
        park_dirty_on_switch: true,
        ..CoordinatorConfig::default()
    };
    let mut fx = fixture_with(config, &[("/vault/a.md", "X"), ("/vault/b.md", "b")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("X plus local").unwrap();
    fx.coordinator.select("/vault/b.md").unwrap();

    fx.coordinator.store_mut().put("/vault/a.md", "Y");

    assert_eq!(
        fx.coordinator.select("/vault/a.md").unwrap(),
        SelectOutcome::Loaded
    );
    let active = fx.coordinator.active().unwrap();
    assert_eq!(active.content(), "Y");
    assert!(!active.is_dirty());
    assert_eq!(
        fx.coordinator.take_notices(),
        vec![Notice::CachedEditsDiscarded {
            path: NormalizedPath::from("/vault/a.md"),
            content: "X plus local".into(),
        }]
    );
}

#[test]
fn conflicted_document_is_saved_rather_than_parked() {
    let config = CoordinatorConfig {
        park_dirty_on_switch: true,
        ..CoordinatorConfig::default()
    };
    let mut fx = fixture_with(config, &[("/vault/a.md", "a"), ("/vault/b.md", "b")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a local").unwrap();
    fx.coordinator.store_mut().put("/vault/a.md", "a remote");
    let change = modified("/vault/a.md", &fx);
    fx.coordinator.handle_external_change(change);
    assert!(fx.coordinator.active().unwrap().in_conflict());
    fx.coordinator.take_notices();

    fx.coordinator.select("/vault/b.md").unwrap();
    assert_eq!(fx.coordinator.store().text("/vault/a.md").as_deref(), Some("a local"));

    fx.coordinator.select("/vault/a.md").unwrap();
    let active = fx.coordinator.active().unwrap();
    assert_eq!(active.content(), "a local");
    assert!(!active.in_conflict());
    assert!(fx.coordinator.take_notices().is_empty());
}

#[test]
fn failed_conflicted_save_blocks_switch_in_park_mode() {
    let config = CoordinatorConfig {
        park_dirty_on_switch: true,
        ..CoordinatorConfig::default()
    };
    let mut fx = fixture_with(config, &[("/vault/a.md", "a"), ("/vault/b.md", "b")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a local").unwrap();
    fx.coordinator.store_mut().put("/vault/a.md", "a remote");
    let change = modified("/vault/a.md", &fx);
    fx.coordinator.handle_external_change(change);
    fx.coordinator.store_mut().fail_writes = true;

    let err = fx.coordinator.select("/vault/b.md").unwrap_err();
    assert!(matches!(err, CoordinatorError::SwitchBlocked { .. }));
    let active = fx.coordinator.active().unwrap();
    assert_eq!(active.path().as_str(), "/vault/a.md");
    assert_eq!(active.content(), "a local");
}

#[test]
fn external_change_to_cached_file_invalidates_and_refreshes_listing() {
    let mut fx = fixture(&[("/vault/a.md", "a"), ("/vault/b.md", "b")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.select("/vault/b.md").unwrap();
    let a = NormalizedPath::from("/vault/a.md");
    assert!(fx.coordinator.cache().contains(&a));
    let before = fx.refreshes.count();

    let change = modified("/vault/a.md", &fx);
    fx.coordinator.handle_external_change(change);

    assert!(!fx.coordinator.cache().contains(&a));
    assert_eq!(fx.refreshes.count(), before + 1);
    assert!(fx.coordinator.take_notices().is_empty());
}

#[test]
fn removal_of_active_document_keeps_content() {
    let mut fx = fixture(&[("/vault/a.md", "keep me")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.store_mut().files.clear();

    let path = NormalizedPath::from("/vault/a.md");
    let now = fx.clock.now();
    fx.coordinator
        .handle_external_change(ExternalChange::new(path.clone(), ChangeKind::Removed, now));

    assert_eq!(
        fx.coordinator.take_notices(),
        vec![Notice::ActiveRemoved { path }]
    );
    assert_eq!(fx.coordinator.active().unwrap().content(), "keep me");
}

#[test]
fn read_failure_aborts_load_and_keeps_current_document() {
    let mut fx = fixture(&[("/vault/a.md", "a")]);
    fx.coordinator.select("/vault/a.md").unwrap();

    let err = fx.coordinator.select("/vault/missing.md").unwrap_err();
    assert!(matches!(err, CoordinatorError::Read(ReadError::NotFound { .. })));
    assert_eq!(
        fx.coordinator.active_path().map(NormalizedPath::as_str),
        Some("/vault/a.md")
    );
}

#[test]
fn slow_write_is_reported_as_timeout_and_stays_dirty() {
    let mut fx = fixture(&[("/vault/a.md", "a")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a!").unwrap();
    let budget = fx.coordinator.config().save_timeout;
    fx.coordinator.store_mut().write_delay = budget + Duration::from_secs(1);

    let err = fx.coordinator.save_active().unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Save(SaveError::Timeout { .. })
    ));
    assert!(fx.coordinator.active().unwrap().is_dirty());
}

#[test]
fn failed_load_in_park_mode_keeps_autosave_armed() {
    let config = CoordinatorConfig {
        park_dirty_on_switch: true,
        ..CoordinatorConfig::default()
    };
    let mut fx = fixture_with(config, &[("/vault/a.md", "a")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a!").unwrap();

    assert!(fx.coordinator.select("/vault/missing.md").is_err());
    assert!(fx.coordinator.next_deadline().is_some());

    fx.clock.advance(Duration::from_millis(1000));
    fx.coordinator.tick();
    assert_eq!(fx.coordinator.store().text("/vault/a.md").as_deref(), Some("a!"));
    assert!(!fx.coordinator.active().unwrap().is_dirty());
}

#[test]
fn timed_out_write_echo_is_not_a_conflict() {
    let config = CoordinatorConfig {
        autosave_enabled: false,
        ..CoordinatorConfig::default()
    };
    let mut fx = fixture_with(config, &[("/vault/a.md", "a")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a!").unwrap();
    let budget = fx.coordinator.config().save_timeout;
    fx.coordinator.store_mut().write_delay = budget + Duration::from_secs(1);
    assert!(fx.coordinator.save_active().is_err());

    let echo = modified("/vault/a.md", &fx);
    fx.coordinator.handle_external_change(echo);
    fx.clock.advance(fx.coordinator.config().save_grace_period);
    fx.coordinator.tick();

    assert!(fx.coordinator.take_notices().is_empty());
    let active = fx.coordinator.active().unwrap();
    assert!(!active.in_conflict());
    assert!(active.is_dirty());

    fx.coordinator.store_mut().write_delay = Duration::ZERO;
    assert_eq!(fx.coordinator.save_active().unwrap(), SaveReport::Saved);
    assert_eq!(fx.coordinator.store().writes.len(), 2);
}

#[test]
fn failed_autosave_warns_and_waits_for_next_edit() {
    let mut fx = fixture(&[("/vault/a.md", "a")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.store_mut().fail_writes = true;
    fx.coordinator.edit("a!").unwrap();

    fx.clock.advance(Duration::from_millis(1000));
    fx.coordinator.tick();
    let notices = fx.coordinator.take_notices();
    assert!(matches!(notices.as_slice(), [Notice::AutosaveFailed { .. }]));
    assert!(fx.coordinator.active().unwrap().is_dirty());
    assert!(fx.coordinator.next_deadline().is_some(), "save window still open");

    fx.clock.advance(Duration::from_secs(30));
    fx.coordinator.tick();
    assert!(fx.coordinator.take_notices().is_empty());

    fx.coordinator.store_mut().fail_writes = false;
    fx.coordinator.edit("a!!").unwrap();
    fx.clock.advance(Duration::from_millis(1000));
    fx.coordinator.tick();
    assert_eq!(fx.coordinator.store().text("/vault/a.md").as_deref(), Some("a!!"));
}

#[test]
fn evicting_a_parked_dirty_session_flushes_it() {
    let config = CoordinatorConfig {
        park_dirty_on_switch: true,
        cache_capacity: 1,
        ..CoordinatorConfig::default()
    };
    let mut fx = fixture_with(
        config,
        &[("/vault/a.md", "a"), ("/vault/b.md", "b"), ("/vault/c.md", "c")],
    );
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a edited").unwrap();
    fx.clock.advance(Duration::from_millis(10));
    fx.coordinator.select("/vault/b.md").unwrap();
    fx.clock.advance(Duration::from_millis(10));
    fx.coordinator.select("/vault/c.md").unwrap();

    assert_eq!(fx.coordinator.store().text("/vault/a.md").as_deref(), Some("a edited"));
    assert_eq!(fx.coordinator.cache().len(), 1);
}

#[test]
fn shutdown_persists_active_and_parked_sessions() {
    let config = CoordinatorConfig {
        park_dirty_on_switch: true,
        ..CoordinatorConfig::default()
    };
    let mut fx = fixture_with(config, &[("/vault/a.md", "a"), ("/vault/b.md", "b")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a edited").unwrap();
    fx.coordinator.select("/vault/b.md").unwrap();
    fx.coordinator.edit("b edited").unwrap();
    assert_eq!(fx.coordinator.dirty_documents().len(), 2);

    assert!(fx.coordinator.shutdown().is_empty());
    assert!(fx.coordinator.dirty_documents().is_empty());
    assert_eq!(fx.coordinator.store().text("/vault/a.md").as_deref(), Some("a edited"));
    assert_eq!(fx.coordinator.store().text("/vault/b.md").as_deref(), Some("b edited"));
}

#[test]
fn switching_directory_saves_then_clears_everything() {
    let mut fx = fixture(&[("/vault/a.md", "a"), ("/vault/b.md", "b")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.select("/vault/b.md").unwrap();
    fx.coordinator.edit("b edited").unwrap();
    let before = fx.refreshes.count();

    fx.coordinator.open_directory("/other").unwrap();

    assert!(fx.coordinator.active().is_none());
    assert!(fx.coordinator.cache().is_empty());
    assert_eq!(fx.coordinator.root().map(NormalizedPath::as_str), Some("/other"));
    assert_eq!(fx.coordinator.store().text("/vault/b.md").as_deref(), Some("b edited"));
    assert_eq!(fx.refreshes.count(), before + 1);
}

#[test]
fn switching_directory_drops_pending_save_windows() {
    let mut fx = fixture(&[("/vault/a.md", "a")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a edited").unwrap();
    fx.coordinator.save_active().unwrap();
    fx.coordinator.store_mut().put("/vault/a.md", "late sync");
    let change = modified("/vault/a.md", &fx);
    fx.coordinator.handle_external_change(change);

    fx.coordinator.open_directory("/other").unwrap();
    let path = NormalizedPath::from("/vault/a.md");
    assert!(!fx.coordinator.is_save_window_open(&path));
    assert!(fx.coordinator.next_deadline().is_none());
    let before = fx.refreshes.count();

    fx.clock.advance(fx.coordinator.config().save_grace_period);
    fx.coordinator.tick();
    assert!(fx.coordinator.take_notices().is_empty());
    assert_eq!(fx.refreshes.count(), before);
}

#[test]
fn large_document_switch_announces_saving() {
    let config = CoordinatorConfig {
        large_document_bytes: 8,
        ..CoordinatorConfig::default()
    };
    let mut fx = fixture_with(config, &[("/vault/a.md", "a"), ("/vault/b.md", "b")]);
    fx.coordinator.select("/vault/a.md").unwrap();
    fx.coordinator.edit("a long enough body").unwrap();
    fx.coordinator.select("/vault/b.md").unwrap();

    assert_eq!(
        fx.coordinator.take_notices(),
        vec![Notice::SavingLargeDocument {
            path: NormalizedPath::from("/vault/a.md"),
            bytes: 18,
        }]
    );
}

#[test]
fn edits_require_an_active_document() {
    let mut fx = fixture(&[]);
    assert!(matches!(
        fx.coordinator.edit("text"),
        Err(CoordinatorError::NoActiveDocument)
    ));
    assert!(matches!(
        fx.coordinator.save_active(),
        Err(CoordinatorError::NoActiveDocument)
    ));
}
