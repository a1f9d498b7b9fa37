use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use runlens_core::config::Config;
use runlens_ingest::fanout::FanoutHub;
use runlens_ingest::server::run_ingest_servers;
use runlens_store::{MigrationOutcome, Store};

#[derive(Parser, Debug)]
#[command(name = "runlens")]
#[command(about = "Agent trace ingest, normalization and live replay service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the trace receivers (migrates the span schema first)")]
    Run {
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        otlp_grpc_addr: Option<String>,
        #[arg(long)]
        otlp_http_addr: Option<String>,
    },
    #[command(about = "Migrate the span table to the canonical layout and report")]
    Migrate {
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Restore the legacy span table from its backup, if present")]
    Restore {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            db_path,
            otlp_grpc_addr,
            otlp_http_addr,
        } => {
            let mut cfg = Config::load().context("failed to load configuration")?;
            if let Some(v) = db_path {
                cfg.db_path = v;
            }
            if let Some(v) = otlp_grpc_addr {
                cfg.otlp_grpc_addr = v;
            }
            if let Some(v) = otlp_http_addr {
                cfg.otlp_http_addr = v;
            }

            let store = Store::open(&cfg.db_path).context("failed to open span store")?;
            let fanout = FanoutHub::new(cfg.fanout_channel_capacity);
            tracing::info!(
                grpc = %cfg.otlp_grpc_addr,
                http = %cfg.otlp_http_addr,
                db = %cfg.db_path.display(),
                "starting trace receivers"
            );
            run_ingest_servers(store, fanout, &cfg).await?;
            Ok(())
        }
        Commands::Migrate { db_path, json } => {
            let mut cfg = Config::load().context("failed to load configuration")?;
            if let Some(v) = db_path {
                cfg.db_path = v;
            }
            let store = Store::open(&cfg.db_path).context("failed to open span store")?;
            let report = store.migrate_legacy_spans(cfg.migration_batch_size)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match report.outcome {
                    MigrationOutcome::Fresh => println!("created canonical span schema"),
                    MigrationOutcome::AlreadyCanonical => {
                        println!("span table already canonical; nothing to migrate")
                    }
                    MigrationOutcome::Migrated => {
                        println!("migrated {} rows ({} failed)", report.migrated, report.failed);
                        if report.count_mismatch {
                            println!(
                                "warning: canonical table holds {} rows, expected {}",
                                report.table_rows, report.migrated
                            );
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Restore { db_path } => {
            let mut cfg = Config::load().context("failed to load configuration")?;
            if let Some(v) = db_path {
                cfg.db_path = v;
            }
            let store = Store::open(&cfg.db_path).context("failed to open span store")?;
            if store.restore_legacy_spans()? {
                println!("legacy span table restored");
            } else {
                println!("no backup table present; nothing restored");
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .try_init();
}
