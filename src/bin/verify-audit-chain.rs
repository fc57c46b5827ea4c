use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use audit_chain::checkpoint::CheckpointService;
use audit_chain::config::{AppConfig, DEFAULT_CONFIG_FILE};
use audit_chain::store::{self, AuditStore, SqlStore};

#[derive(Parser)]
#[command(name = "verify-audit-chain", version, about = "Verify audit chain integrity offline")]
struct Cli {
    /// Configuration file (witness settings, default database)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Database URL, overriding the configuration
    #[arg(short, long)]
    database: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify the newest entries of the chain
    Chain {
        #[arg(short, long, default_value_t = store::DEFAULT_VERIFY_LIMIT)]
        limit: i64,
        /// Include per-entry results
        #[arg(long)]
        details: bool,
    },
    /// Re-verify a checkpoint against the live chain
    Checkpoint { id: Uuid },
    /// List recent checkpoints
    Checkpoints {
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    let config = AppConfig::load_from(&cli.config)?;
    let url = cli.database.clone().unwrap_or_else(|| config.database.url.clone());
    info!("Opening audit store at {}", url);

    let sql = SqlStore::connect(&url).await?;
    sql.initialize().await?;
    let store: Arc<dyn AuditStore> = Arc::new(sql);

    let valid = match cli.command {
        Command::Chain { limit, details } => {
            let result = store::verify_chain(store.as_ref(), limit, details).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "Checked {} entries: {} content violations, {} linkage violations",
                    result.checked, result.content_invalid, result.linkage_invalid
                );
                for violation in &result.violations {
                    println!("  {}", violation);
                }
            }
            result.valid
        }
        Command::Checkpoint { id } => {
            let witness = config.build_witness()?;
            let service = CheckpointService::new(store, witness);
            let result = service.verify_checkpoint(id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "Checkpoint {} (seq {}, {} entries): chain {}, witness {}, entries {}",
                    result.checkpoint.id,
                    result.checkpoint.last_sequence,
                    result.checkpoint.entry_count,
                    status(result.chain_valid),
                    status(result.witness_valid),
                    status(result.entries_intact)
                );
                for violation in &result.violations {
                    println!("  {}", violation);
                }
            }
            result.valid
        }
        Command::Checkpoints { limit } => {
            let checkpoints = store.list_checkpoints(limit).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&checkpoints)?);
            } else {
                for cp in &checkpoints {
                    println!(
                        "{}  {}  seq {:>8}  {:>8} entries  {} ({})",
                        cp.created_at.to_rfc3339(),
                        cp.id,
                        cp.last_sequence,
                        cp.entry_count,
                        cp.witness_type,
                        cp.witness_status.as_str()
                    );
                }
            }
            true
        }
    };

    if !valid {
        error!("Audit chain verification failed");
        return Err(anyhow!("audit chain verification failed"));
    }

    if !cli.json {
        println!("✓ Verification completed successfully");
    }
    Ok(())
}

fn status(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "FAILED"
    }
}
