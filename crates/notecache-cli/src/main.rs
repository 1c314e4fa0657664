//! notecache - derived-content cache driver for a folder of notes.
//!
//! Scans a vault directory, fills the cache database with previews, tags,
//! metadata, and feature images, and can keep it current with a watcher.

mod index;
mod vault;
mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notecache_core::{CacheSettings, ContentKind, TagNode};
use notecache_db::{CacheDatabase, LocalStorage};
use notecache_jobs::ProviderConfig;
use notecache_sync::{SyncConfig, SyncReport, VaultSync, VaultSyncBuilder};

use crate::index::FrontmatterIndex;
use crate::vault::FsVault;
use crate::watcher::{VaultWatcher, WatchBridge};

/// Folder inside the vault holding the database and local storage.
const STATE_DIR: &str = ".notecache";

#[derive(Parser)]
#[command(name = "notecache")]
#[command(about = "Derived-content cache for a folder of markdown notes", long_about = None)]
struct Cli {
    /// Vault root directory
    #[arg(long, env = "NOTECACHE_VAULT", value_name = "DIR")]
    vault: PathBuf,

    /// Database file (defaults to <vault>/.notecache/cache.db)
    #[arg(long, env = "NOTECACHE_DB", value_name = "FILE")]
    db: Option<PathBuf>,

    /// Cache settings as YAML or JSON
    #[arg(long, env = "NOTECACHE_SETTINGS", value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Seconds to wait for background processing before giving up
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the cache with the vault and wait for processing
    Scan,
    /// Show cache contents and outstanding work
    Status,
    /// Print the tag tree from cached tags
    Tags,
    /// Clear the cache and regenerate everything
    Rebuild,
    /// Sync, then keep the cache current until interrupted
    Watch,
}

/// Opened vault, index, and sync orchestrator.
struct App {
    vault: Arc<FsVault>,
    index: Arc<FrontmatterIndex>,
    db: CacheDatabase,
    sync: VaultSync,
    timeout: Duration,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let root = cli
            .vault
            .canonicalize()
            .with_context(|| format!("Vault not found: {}", cli.vault.display()))?;
        let state_dir = root.join(STATE_DIR);
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("Cannot create {}", state_dir.display()))?;

        let settings = match &cli.settings {
            Some(path) => load_settings(path)?,
            None => CacheSettings::default(),
        };
        let db_path = cli.db.clone().unwrap_or_else(|| state_dir.join("cache.db"));
        let db = CacheDatabase::open(&db_path)
            .await
            .with_context(|| format!("Cannot open database {}", db_path.display()))?;
        let storage = Arc::new(LocalStorage::open(state_dir.join("storage.json")));

        let vault = Arc::new(FsVault::new(&root));
        let index = Arc::new(FrontmatterIndex::new(vault.clone()));
        let sync = VaultSyncBuilder::new(db.records.clone(), vault.clone(), index.clone())
            .with_settings(settings)
            .with_config(SyncConfig::from_env())
            .with_provider_config(ProviderConfig::from_env())
            .with_storage(storage)
            .build()
            .await;

        info!(
            subsystem = "cli",
            vault = %root.display(),
            db = %db_path.display(),
            records = db.records.len(),
            "Cache opened"
        );
        Ok(Self {
            vault,
            index,
            db,
            sync,
            timeout: Duration::from_secs(cli.timeout),
        })
    }

    /// Index the vault and run the initial load.
    async fn start(&self) -> Result<SyncReport> {
        let indexed = self.index.index_all().await?;
        info!(subsystem = "cli", indexed, "Metadata index ready");
        Ok(self.sync.start().await?)
    }

    async fn wait_idle(&self) {
        if tokio::time::timeout(self.timeout, self.sync.wait_idle())
            .await
            .is_err()
        {
            warn!(
                subsystem = "cli",
                timeout_secs = self.timeout.as_secs(),
                waiting = self.sync.gate().pending_count(),
                "Processing did not finish in time"
            );
        }
    }
}

fn load_settings(path: &Path) -> Result<CacheSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read settings {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("Invalid settings {}", path.display()))
}

fn init_tracing() {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   RUST_LOG    - standard env filter (default: "notecache=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "notecache=info,notecache_sync=info,notecache_jobs=info,notecache_db=warn".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_report(report: &SyncReport) {
    println!(
        "added {}, updated {}, removed {}, queued {} markdown / {} pdf",
        report.added, report.updated, report.removed, report.queued_markdown, report.queued_pdfs
    );
}

fn print_status(app: &App) {
    let records = &app.db.records;
    let settings = app.sync.settings();
    println!("records: {}", records.len());
    for kind in settings.enabled_content_kinds() {
        println!(
            "  {:<14} pending {}",
            kind.as_str(),
            records.count_files_needing_any_content(&[kind])
        );
    }
    let all: Vec<ContentKind> = settings.enabled_content_kinds();
    println!("  {:<14} pending {}", "any", records.count_files_needing_any_content(&all));
    match app.sync.storage().rebuild_notice_state() {
        Some(state) => println!(
            "rebuild in progress: {} files ({})",
            state.total, state.source
        ),
        None => println!("no rebuild in progress"),
    }
}

fn print_tag(node: &TagNode, depth: usize) {
    println!(
        "{:indent$}#{} ({})",
        "",
        node.name,
        node.total_count(),
        indent = depth * 2
    );
    for child in node.children.values() {
        print_tag(child, depth + 1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::open(&cli).await?;

    match cli.command {
        Commands::Scan => {
            let report = app.start().await?;
            app.wait_idle().await;
            print_report(&report);
            print_status(&app);
        }
        Commands::Status => print_status(&app),
        Commands::Tags => {
            app.sync.rebuild_trees();
            let tree = app.sync.tag_tree().borrow().clone();
            for node in tree.roots.values() {
                print_tag(node, 0);
            }
            println!("untagged: {}", tree.untagged);
        }
        Commands::Rebuild => {
            app.start().await?;
            app.sync.rebuild_cache().await?;
            app.wait_idle().await;
            print_status(&app);
        }
        Commands::Watch => {
            let report = app.start().await?;
            print_report(&report);
            let mut watcher = VaultWatcher::new(app.vault.root())
                .with_context(|| format!("Cannot watch {}", app.vault.root().display()))?;
            let bridge = WatchBridge::new(
                app.vault.clone(),
                app.index.clone(),
                app.db.records.clone(),
            );
            info!(subsystem = "cli", "Watching for changes, Ctrl-C to stop");
            loop {
                tokio::select! {
                    event = watcher.next() => match event {
                        Some(event) => bridge.apply_event(&event).await,
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    app.sync.shutdown().await;
    app.db.pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    run(Cli::parse()).await
}
