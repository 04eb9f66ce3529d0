use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::{Builder, Env};
use log::info;
use rustnotes_core::store::TEMP_SUFFIX;
use rustnotes_core::{
    ChangeKind, Clock, CoordinatorConfig, CoordinatorError, DirectoryRefresh, DirectoryWatcher,
    ExternalChange, FsDocumentStore, ManualClock, NormalizedPath, NoteCoordinator,
    Notice, SaveReport, SelectOutcome, SystemClock,
};
use rustnotes_settings::PreferencesStore;
use walkdir::WalkDir;

mod script;

use script::Step;

#[derive(Parser)]
#[command(
    name = "rustnotes-cli",
    about = "Drive the RustNotes document coordinator against a notes directory",
    author,
    version
)]
struct Cli {
    /// 指定工作區根目錄（存放偏好設定）；預設為目前目錄。 / Workspace root holding `.rustnotes/preferences.json` (defaults to current directory).
    #[arg(long, global = true, value_name = "PATH")]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 以手動時鐘重播編輯腳本。 / Replay an editing script on a manual clock.
    Replay(ReplayArgs),
    /// 監看筆記目錄並列出變更。 / Watch a notes directory and print debounced changes.
    Watch(WatchArgs),
    /// 檢視偏好設定。 / Inspect preferences.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args)]
struct ReplayArgs {
    /// 筆記根目錄。 / Notes root directory.
    #[arg(long, value_name = "DIR")]
    root: PathBuf,

    /// 腳本檔案路徑。 / Script file to replay.
    #[arg(value_name = "SCRIPT")]
    script: PathBuf,

    /// 切換時將未儲存文件留在快取。 / Park dirty documents in the cache instead of saving on switch.
    #[arg(long)]
    park_dirty: bool,
}

#[derive(Args)]
struct WatchArgs {
    /// 要監看的筆記目錄。 / Notes directory to watch.
    #[arg(value_name = "DIR")]
    root: PathBuf,

    /// 監看秒數；省略則持續執行。 / Stop after this many seconds; runs until interrupted when omitted.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// 覆寫去抖動毫秒數。 / Override the debounce window in milliseconds.
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// 以 JSON 顯示生效中的偏好設定。 / Print the effective preferences as JSON.
    Show,
}

fn main() {
    init_logger();
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("warn")).init();
}

fn run() -> Result<()> {
    let Cli { workspace, command } = Cli::parse();
    let workspace_root = resolve_workspace(workspace)?;
    let preferences = PreferencesStore::load(preferences_path(&workspace_root))
        .context("load preferences")?;
    info!("preferences: using {}", preferences.path().display());

    match command {
        Commands::Replay(args) => execute_replay(args, preferences.to_coordinator_config()),
        Commands::Watch(args) => execute_watch(args, preferences.to_coordinator_config()),
        Commands::Config(ConfigCommand::Show) => {
            let payload = serde_json::to_string_pretty(preferences.preferences())
                .context("serialize preferences")?;
            println!("{payload}");
            Ok(())
        }
    }
}

/// 目錄清單重新整理：以 walkdir 計算檔案數量。 / Directory listing refresh backed by `walkdir`.
struct ListingRefresh;

impl DirectoryRefresh for ListingRefresh {
    fn refresh(&mut self, root: &NormalizedPath) {
        let count = WalkDir::new(root.to_path_buf())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| !entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .count();
        println!("listing: {count} file(s)");
    }
}

struct Replay {
    root: PathBuf,
    root_path: NormalizedPath,
    clock: ManualClock,
    coordinator: NoteCoordinator<FsDocumentStore, ListingRefresh, ManualClock>,
}

impl Replay {
    fn apply(&mut self, step: Step) -> Result<()> {
        match step {
            Step::Open(rel) => {
                let outcome = self.coordinator.select(self.root.join(&rel));
                self.report(outcome.map(|outcome| {
                    let how = match outcome {
                        SelectOutcome::AlreadyActive => "already active",
                        SelectOutcome::Restored => "restored",
                        SelectOutcome::Loaded => "loaded",
                    };
                    println!("opened {rel} ({how})");
                }));
            }
            Step::Type(text) => {
                let current = self
                    .coordinator
                    .active()
                    .map(|active| active.content().to_owned());
                let result = match current {
                    Some(current) => self.coordinator.edit(current + &text),
                    None => Err(CoordinatorError::NoActiveDocument),
                };
                self.report(result);
            }
            Step::Set(text) => {
                let result = self.coordinator.edit(text);
                self.report(result);
            }
            Step::Wait(duration) => self.wait(duration),
            Step::Save => {
                let result = self.coordinator.save_active();
                self.report(result.map(|report| match report {
                    SaveReport::Saved => println!("saved"),
                    SaveReport::Unchanged => println!("unchanged"),
                }));
            }
            Step::External { path, text } => {
                let target = self.root.join(&path);
                let kind = if target.exists() {
                    ChangeKind::Modified
                } else {
                    ChangeKind::Created
                };
                fs::write(&target, text)
                    .with_context(|| format!("write {}", target.display()))?;
                println!("external write {path}");
                self.inject(&target, kind);
            }
            Step::Delete(path) => {
                let target = self.root.join(&path);
                fs::remove_file(&target)
                    .with_context(|| format!("remove {}", target.display()))?;
                println!("external delete {path}");
                self.inject(&target, ChangeKind::Removed);
            }
            Step::Discard => {
                let result = self.coordinator.discard_changes();
                self.report(result);
            }
            Step::Status => self.print_status(),
        }
        self.print_notices();
        Ok(())
    }

    /// 推進手動時鐘，途中依序觸發每個到期的計時器。 / Advances the clock, firing every deadline on the way.
    fn wait(&mut self, duration: Duration) {
        let target = self.clock.now() + duration;
        while let Some(deadline) = self.coordinator.next_deadline() {
            if deadline > target {
                break;
            }
            let now = self.clock.now();
            if deadline > now {
                self.clock.advance(deadline - now);
            }
            self.coordinator.tick();
            self.print_notices();
            if self.coordinator.next_deadline() == Some(deadline) {
                break;
            }
        }
        let now = self.clock.now();
        if target > now {
            self.clock.advance(target - now);
        }
        self.coordinator.tick();
    }

    fn inject(&mut self, target: &Path, kind: ChangeKind) {
        let change = ExternalChange::new(NormalizedPath::new(target), kind, self.clock.now());
        self.coordinator.handle_external_change(change);
    }

    fn report<T>(&self, result: Result<T, CoordinatorError>) {
        if let Err(err) = result {
            println!("error: {err}");
        }
    }

    fn print_status(&self) {
        let active = self.coordinator.active();
        let path = self.coordinator.active_path();
        println!(
            "status: active={} dirty={} conflict={} cached={} saving={}",
            path.map(|path| self.relative(path))
                .unwrap_or_else(|| "-".to_string()),
            active.is_some_and(|active| active.is_dirty()),
            active.is_some_and(|active| active.in_conflict()),
            self.coordinator.cache().len(),
            path.is_some_and(|path| self.coordinator.is_save_window_open(path)),
        );
    }

    fn print_notices(&mut self) {
        for notice in self.coordinator.take_notices() {
            let line = match notice {
                Notice::Conflict { path } => format!("conflict {}", self.relative(&path)),
                Notice::Reloaded { path } => format!("reloaded {}", self.relative(&path)),
                Notice::ActiveRemoved { path } => format!("removed {}", self.relative(&path)),
                Notice::AutosaveFailed { path, error } => {
                    format!("autosave failed {}: {error}", self.relative(&path))
                }
                Notice::CachedEditsDiscarded { path, content } => format!(
                    "cached edits discarded {} ({} bytes)",
                    self.relative(&path),
                    content.len()
                ),
                Notice::EvictedUnsaved { path, content } => format!(
                    "evicted unsaved {} ({} bytes)",
                    self.relative(&path),
                    content.len()
                ),
                Notice::SavingLargeDocument { path, bytes } => {
                    format!("saving large document {} ({bytes} bytes)", self.relative(&path))
                }
            };
            println!("notice: {line}");
        }
    }

    fn relative(&self, path: &NormalizedPath) -> String {
        path.as_str()
            .strip_prefix(self.root_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(path.as_str())
            .to_string()
    }
}

fn execute_replay(args: ReplayArgs, mut config: CoordinatorConfig) -> Result<()> {
    if args.park_dirty {
        config.park_dirty_on_switch = true;
    }
    let root = resolve_input_path(&args.root)?;
    if !root.is_dir() {
        bail!("notes directory '{}' does not exist", root.display());
    }
    let source = fs::read_to_string(&args.script)
        .with_context(|| format!("read script {}", args.script.display()))?;
    let steps = script::parse(&source)?;

    let clock = ManualClock::new();
    let mut coordinator =
        NoteCoordinator::new(config, FsDocumentStore, ListingRefresh, clock.clone());
    coordinator
        .open_directory(&root)
        .context("open notes directory")?;

    let mut replay = Replay {
        root_path: NormalizedPath::new(&root),
        root,
        clock,
        coordinator,
    };
    for (line, step) in steps {
        replay
            .apply(step)
            .with_context(|| format!("script line {line}"))?;
    }

    let failures = replay.coordinator.shutdown();
    replay.print_notices();
    for (path, err) in &failures {
        println!("unsaved {}: {err}", replay.relative(path));
    }
    if !failures.is_empty() {
        bail!("{} document(s) could not be saved", failures.len());
    }
    Ok(())
}

fn execute_watch(args: WatchArgs, config: CoordinatorConfig) -> Result<()> {
    let root = resolve_input_path(&args.root)?;
    if !root.is_dir() {
        bail!("notes directory '{}' does not exist", root.display());
    }
    let debounce = args
        .debounce_ms
        .map(Duration::from_millis)
        .unwrap_or(config.watcher_debounce);
    let mut watcher = DirectoryWatcher::new(&root, debounce)
        .with_context(|| format!("watch {}", root.display()))?;
    let mut coordinator = NoteCoordinator::new(config, FsDocumentStore, ListingRefresh, SystemClock);
    coordinator
        .open_directory(&root)
        .context("open notes directory")?;
    println!("watching {}", watcher.root());

    let stop_at = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        let now = Instant::now();
        let mut timeout = Duration::from_millis(500);
        if let Some(stop_at) = stop_at {
            if now >= stop_at {
                break;
            }
            timeout = timeout.min(stop_at - now);
        }
        if let Some(deadline) = coordinator.next_deadline() {
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }

        for change in watcher.wait(timeout)? {
            let kind = match &change.kind {
                ChangeKind::Modified => "modified".to_string(),
                ChangeKind::Created => "created".to_string(),
                ChangeKind::Removed => "removed".to_string(),
                ChangeKind::Renamed { from } => format!("renamed from {from}"),
            };
            println!("change: {} {kind}", change.path);
            coordinator.handle_external_change(change);
        }
        coordinator.tick();
        for notice in coordinator.take_notices() {
            println!("notice: {notice:?}");
        }
    }
    Ok(())
}

fn preferences_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".rustnotes").join("preferences.json")
}

fn resolve_workspace(workspace: Option<PathBuf>) -> Result<PathBuf> {
    match workspace {
        Some(path) => resolve_input_path(&path),
        None => std::env::current_dir().context("determine current directory"),
    }
}

fn resolve_input_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}
