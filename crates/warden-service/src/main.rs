use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch, Notify};
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_core::config::{default_config_path, WardenConfig};
use warden_core::scanner::resolve_root;
use warden_core::{BaselineStore, FileHasher, Reconciler, Scanner};
use warden_service::audit::spawn_audit_loop;
use warden_service::monitor::{Monitor, MonitorOptions};
use warden_service::sinks::{build_sink, JournalSink};
use warden_service::watcher::FileWatcher;

#[derive(Parser, Debug)]
#[command(author, version, about = "Warden file integrity monitor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a baseline and watch the root until interrupted
    Run {
        /// Directory to watch (overrides the config file)
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Build a baseline once and print it
    Scan {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Emit JSON instead of `digest  path` lines
        #[arg(long)]
        json: bool,
    },
    /// Show the most recent entries of the alert journal
    Alerts {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Emit one JSON entry per line
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { root, config } => run_command(load_config(config, root)?).await,
        Commands::Scan { root, config, json } => {
            scan_command(load_config(config, root)?, json).await
        }
        Commands::Alerts {
            config,
            limit,
            json,
        } => alerts_command(load_config(config, None)?, limit, json),
    }
}

fn load_config(explicit: Option<PathBuf>, root: Option<PathBuf>) -> Result<WardenConfig> {
    let config = match explicit {
        Some(path) => WardenConfig::load(&path)?,
        None => WardenConfig::load_or_default(&default_config_path()?)?,
    };
    let config = config.with_root_override(root);
    config.validate()?;
    init_tracing(&config.log_level);
    Ok(config)
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_command(config: WardenConfig) -> Result<()> {
    let root = resolve_root(config.require_root()?).context("cannot start monitoring")?;
    config.check_journal_placement(&root)?;
    let hasher = Arc::new(FileHasher::new(config.algorithm, config.chunk_size));
    let scanner = Scanner::new(root.clone(), hasher.clone());

    let report = {
        let scanner = scanner.clone();
        tokio::task::spawn_blocking(move || scanner.scan()).await?
    };
    let reconciler = Arc::new(Reconciler::new(
        root.clone(),
        BaselineStore::from_baseline(report.baseline),
        hasher,
    ));
    let sink = build_sink(&config.alerts)?;

    let (event_tx, event_rx) = mpsc::channel(config.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let rescan = Arc::new(Notify::new());

    let watcher = FileWatcher::start(&root, event_tx.clone(), Some(rescan.clone()))?;
    let audit_task = config.audit_interval_secs.map(|secs| {
        spawn_audit_loop(
            scanner,
            reconciler.clone(),
            Duration::from_secs(secs),
            rescan,
            event_tx.clone(),
            shutdown_rx.clone(),
        )
    });
    drop(event_tx);

    let monitor = Monitor::new(
        reconciler,
        sink,
        MonitorOptions {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
        },
    );
    let monitor_task = tokio::spawn(monitor.run(event_rx, shutdown_rx));

    info!(root = %root.display(), "service started");
    signal::ctrl_c().await?;
    info!("service stopping");

    let _ = shutdown_tx.send(true);
    watcher.stop()?;
    if let Some(task) = audit_task {
        task.await?;
    }
    monitor_task.await?;
    Ok(())
}

async fn scan_command(config: WardenConfig, json: bool) -> Result<()> {
    let root = resolve_root(config.require_root()?)?;
    let hasher = Arc::new(FileHasher::new(config.algorithm, config.chunk_size));
    let scanner = Scanner::new(root.clone(), hasher);
    let report = tokio::task::spawn_blocking(move || scanner.scan()).await?;

    let files: BTreeMap<String, String> = report
        .baseline
        .iter()
        .map(|(path, digest)| (path.display().to_string(), digest.to_hex()))
        .collect();

    if json {
        let out = serde_json::json!({
            "root": root,
            "algorithm": config.algorithm,
            "files": files,
            "errors": report.errors,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for (path, digest) in &files {
            println!("{digest}  {path}");
        }
        for err in &report.errors {
            eprintln!("error: {}: {}", err.path.display(), err.error);
        }
        eprintln!("{} files, {} errors", files.len(), report.errors.len());
    }
    Ok(())
}

fn alerts_command(config: WardenConfig, limit: usize, json: bool) -> Result<()> {
    let path = config
        .alerts
        .journal
        .as_deref()
        .context("no alert journal configured; set \"alerts.journal\"")?;
    let journal = JournalSink::new(path, config.alerts.journal_max_bytes)?;
    for entry in journal.read_recent(Some(limit))? {
        if json {
            println!("{}", serde_json::to_string(&entry)?);
        } else {
            println!(
                "{:>6}  {}  {}",
                entry.seq,
                entry.alert.detected_at.to_rfc3339(),
                entry.message
            );
        }
    }
    Ok(())
}
