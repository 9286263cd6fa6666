//! Catalog Sync - MTG set and symbol catalog
//!
//! Syncs Scryfall, MTGJSON and MTG Vectors into SQLite. Runs once or
//! continuously with a fixed check interval, and can serve the catalog.

use catalog_sync::orchestrator::SyncOrchestrator;
use catalog_sync::{open_database, EntityStore, SqliteStore, SyncConfig, SyncReport, VersionLedger};
use clap::{Parser, Subcommand};
use mtg_common::{EntityKind, SourceId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// MTG catalog sync - reconciles set and symbol data from several upstreams
#[derive(Parser, Debug)]
#[command(name = "catalog_sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (default: built-in sources)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database file, overrides the config
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync sources whose upstream version changed
    Sync {
        /// Only sync these sources (default: all configured)
        #[arg(short, long = "source")]
        sources: Vec<SourceId>,

        /// Refetch these sources even if they look up to date
        #[arg(long)]
        force: Vec<SourceId>,

        /// Refetch every source
        #[arg(long, default_value_t = false)]
        force_all: bool,

        /// Replay cached payloads instead of hitting the network
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Keep running and sync on a fixed interval
        #[arg(long, default_value_t = false)]
        daemon: bool,

        /// Check interval in hours when running as a daemon
        #[arg(long, default_value_t = 6)]
        interval_hours: u64,

        /// Serve the catalog on this port while running as a daemon
        #[arg(long)]
        web_port: Option<u16>,
    },

    /// Show the version ledger and entity counts
    Status,

    /// Delete entities no source reports any more
    Prune {
        /// Entity kind to prune (default: all)
        #[arg(long)]
        kind: Option<EntityKind>,
    },

    /// Serve the catalog over HTTP
    Serve {
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

fn load_config(args: &Args) -> SyncConfig {
    let mut config = match &args.config {
        Some(path) => match SyncConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Invalid configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => SyncConfig::default(),
    };
    if let Some(database) = &args.database {
        config.database = database.clone();
    }
    config
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = load_config(&args);

    log::info!("Starting catalog_sync...");
    log::info!("Database path: {}", config.database.display());

    let db = match open_database(&config.database) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };
    let (store, ledger) = match (SqliteStore::new(Arc::clone(&db)), VersionLedger::new(db)) {
        (Ok(store), Ok(ledger)) => (Arc::new(store) as Arc<dyn EntityStore>, ledger),
        (Err(e), _) | (_, Err(e)) => {
            log::error!("Failed to initialize database schema: {}", e);
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Sync {
            sources,
            force,
            force_all,
            offline,
            json,
            daemon,
            interval_hours,
            web_port,
        } => {
            config.offline |= offline;
            let orchestrator = match SyncOrchestrator::new(&config, Arc::clone(&store), ledger.clone()) {
                Ok(orchestrator) => orchestrator,
                Err(e) => {
                    log::error!("Failed to set up sync: {}", e);
                    std::process::exit(1);
                }
            };
            spawn_ctrl_c_handler(orchestrator.cancellation_token());

            let selected = if sources.is_empty() {
                orchestrator.sources()
            } else {
                sources
            };
            let force: HashSet<SourceId> = if force_all {
                selected.iter().copied().collect()
            } else {
                force.into_iter().collect()
            };

            if daemon {
                if let Some(port) = web_port {
                    let web_store = Arc::clone(&store);
                    let web_ledger = ledger.clone();
                    tokio::spawn(async move {
                        if let Err(e) = catalog_sync::web::serve(web_store, web_ledger, port).await {
                            log::error!("Web server error: {}", e);
                        }
                    });
                }
                log::info!("Running in daemon mode, checking every {} hour(s)", interval_hours);
                run_daemon(&orchestrator, &selected, force, interval_hours).await;
            } else {
                let report = orchestrator.sync_sources(&selected, &force).await;
                print_report(&report, json);
                if report.has_failures() {
                    std::process::exit(1);
                }
            }
        }
        Command::Status => print_status(store.as_ref(), &ledger),
        Command::Prune { kind } => {
            let orchestrator = match SyncOrchestrator::new(&config, store, ledger) {
                Ok(orchestrator) => orchestrator,
                Err(e) => {
                    log::error!("Failed to set up sync: {}", e);
                    std::process::exit(1);
                }
            };
            let kinds = kind.map(|k| vec![k]).unwrap_or_else(|| EntityKind::ALL.to_vec());
            for kind in kinds {
                match orchestrator.prune(kind).await {
                    Ok(removed) => {
                        for key in removed {
                            println!("removed {} {}", kind, key);
                        }
                    }
                    Err(e) => {
                        log::error!("Failed to prune {}: {}", kind, e);
                        std::process::exit(1);
                    }
                }
            }
        }
        Command::Serve { port } => {
            if let Err(e) = catalog_sync::web::serve(store, ledger, port).await {
                log::error!("Web server error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Cancel in-flight cycles on Ctrl-C
fn spawn_ctrl_c_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling sync");
            token.cancel();
        }
    });
}

/// Run the sync daemon - syncs on startup and then on every tick.
/// Forced sources are only forced on the first run.
async fn run_daemon(
    orchestrator: &SyncOrchestrator,
    sources: &[SourceId],
    force: HashSet<SourceId>,
    interval_hours: u64,
) {
    let cancel = orchestrator.cancellation_token();
    let mut ticker = interval(Duration::from_secs(interval_hours.max(1) * 3600));
    let mut force = force;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        log::info!("Scheduled check triggered");
        let report = orchestrator.sync_sources(sources, &force).await;
        print_report(&report, false);
        force.clear();
    }
    log::info!("Daemon stopped");
}

fn print_report(report: &SyncReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(e) => log::error!("Failed to serialize report: {}", e),
        }
    } else {
        println!("{}", report);
    }
}

fn print_status(store: &dyn EntityStore, ledger: &VersionLedger) {
    let records = match ledger.list() {
        Ok(records) => records,
        Err(e) => {
            log::error!("Failed to read version ledger: {}", e);
            std::process::exit(1);
        }
    };

    if records.is_empty() {
        println!("No source has been synced yet");
    }
    for record in records {
        let token = record
            .version_token
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let synced = record
            .last_success_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<10} version {:<24} upstream {:<12} last success {}",
            record.source.as_str(),
            token,
            record.upstream_version.as_deref().unwrap_or("-"),
            synced
        );
        if let Some(error) = record.last_error {
            println!("           last error: {}", error);
        }
    }

    for kind in EntityKind::ALL {
        match store.count(kind) {
            Ok(count) => println!("{:<18} {}", kind.as_str(), count),
            Err(e) => log::error!("Failed to count {}: {}", kind, e),
        }
    }
}
