use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cst_core::format_alert_text;
use cst_storage::{AlertEntry, AlertStore};
use cst_sync::AppConfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cst-cli")]
#[command(about = "Clinical supply chain control tower")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create tables and indexes if missing.
    Setup,
    /// Snapshot-load every matched CSV file.
    Load {
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Parse and reconcile without touching the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the supply watchdog once and persist an alert.
    Monitor,
    /// Print the newest stored alerts.
    Alerts {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Ask the assistant a question.
    Ask { question: Vec<String> },
    Serve {
        /// Also run daily monitoring on the configured schedule.
        #[arg(long)]
        with_scheduler: bool,
    },
}

fn init_tracing(config: &AppConfig) {
    let fallback = format!("{level},sqlx=warn", level = config.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    init_tracing(&config);

    let command = cli.command.unwrap_or(Commands::Load {
        dir: None,
        dry_run: false,
    });
    match command {
        Commands::Setup => {
            let statements = cst_sync::setup_schema(&config).await?;
            println!("schema ready: {statements} statements applied");
        }
        Commands::Load { dir, dry_run } => {
            let summary = cst_sync::run_ingest(&config, dir.as_deref(), dry_run).await?;
            println!(
                "load complete: run_id={} files={} loaded={} skipped={} failed={} unmatched={}{}",
                summary.run_id,
                summary.files_found,
                summary.succeeded(),
                summary.skipped(),
                summary.failed(),
                summary.unmatched_files.len(),
                if summary.dry_run { " (dry run)" } else { "" },
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.failed() > 0 {
                anyhow::bail!("{} table(s) failed to load", summary.failed());
            }
        }
        Commands::Monitor => {
            let summary = cst_sync::run_monitoring(&config).await?;
            println!(
                "monitoring complete: severity={} expiry_risks={} shortfall_risks={} file={}",
                summary.severity,
                summary.expiry_risk_count,
                summary.shortfall_risk_count,
                summary.alert_file
            );
        }
        Commands::Alerts { limit } => {
            let store = AlertStore::new(config.alerts_dir.clone());
            let entries = store.list_latest(limit).await?;
            if entries.is_empty() {
                println!("no alerts in {}", config.alerts_dir.display());
            }
            for entry in entries {
                match entry {
                    AlertEntry::Parsed { alert, .. } => println!("{}\n", format_alert_text(&alert)),
                    AlertEntry::Malformed { file_name, error } => {
                        warn!(file = %file_name, %error, "unreadable alert")
                    }
                }
            }
        }
        Commands::Ask { question } => {
            let question = question.join(" ");
            let parsed = cst_web::chat::parse_question(&question);
            let reply = match cst_web::chat::immediate_reply(&parsed) {
                Some(reply) => reply,
                None => {
                    let pool = cst_storage::connect_pool(&config.database_url).await?;
                    let data = cst_web::chat::PgChatData::new(pool);
                    cst_web::chat::answer(&parsed, &data).await?
                }
            };
            println!("{reply}");
        }
        Commands::Serve { with_scheduler } => {
            let scheduler = if with_scheduler {
                cst_sync::maybe_build_scheduler(&config).await?
            } else {
                None
            };
            if let Some(sched) = &scheduler {
                sched.start().await?;
                info!(cron = %config.monitoring_schedule, "daily monitoring scheduled");
            }
            tokio::select! {
                res = cst_web::serve(config.clone()) => res?,
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
            }
            if let Some(mut sched) = scheduler {
                sched.shutdown().await?;
            }
        }
    }

    Ok(())
}
