use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use spamward::challenge::{self, DecryptedChallengeRequest, EvaluationOptions};
use spamward::config::Config;
use spamward::db::models::DiscoverySource;
use spamward::db::Database;
use spamward::indexer::Indexer;
use spamward::output::terminal;
use spamward::plebbit::fetch_queue::FetchQueue;
use spamward::plebbit::gateway::GatewayClient;
use spamward::risk::{EvaluationInputs, IpIntelligence};
use spamward::util::unix_now;

/// How often the indexer command purges expired challenge sessions.
const PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// Spamward: spam and abuse risk scoring for plebbit publications.
///
/// Scores incoming publications against the author's history, both what
/// this node received directly and what the indexer crawled from the
/// network, and maps the score to a challenge tier.
#[derive(Parser)]
#[command(name = "spamward", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Score a decrypted challenge request and open a challenge session
    Evaluate {
        /// Path to the challenge request JSON
        request: PathBuf,

        /// JSON file with IP intelligence for the publisher's address
        #[arg(long)]
        ip_intel: Option<PathBuf>,

        /// On-chain transaction count for a wallet, as address=count (repeatable)
        #[arg(long = "wallet-tx", value_name = "ADDRESS=COUNT")]
        wallet_tx: Vec<String>,

        /// Print the result as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Report a captcha result for a pending session
    Complete {
        session_id: String,

        /// The captcha was answered incorrectly
        #[arg(long)]
        failed: bool,
    },

    /// Attach an OAuth identity ("provider:id") to a session
    LinkOauth { session_id: String, identity: String },

    /// Run the network indexer until interrupted
    Index,

    /// Add a forum to the indexer's crawl list
    AddSubplebbit {
        /// Forum address (e.g. memes.eth)
        address: String,
    },

    /// Delete expired pending challenge sessions
    Purge,

    /// Show system status (DB stats, indexed forums)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spamward=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing spamward database...");
            let db = spamward::db::initialize_sqlite(&config.db_path)?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nNext: add a forum with `spamward add-subplebbit <address>`");
            println!("then run `spamward index` to start crawling.");
        }

        Commands::Evaluate {
            request,
            ip_intel,
            wallet_tx,
            json,
        } => {
            let db = spamward::db::open_sqlite(&config.db_path)?;

            let raw = std::fs::read_to_string(&request)
                .with_context(|| format!("Failed to read {}", request.display()))?;
            let request: DecryptedChallengeRequest = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid challenge request in {}", request.display()))?;

            let ip_intelligence = match ip_intel {
                Some(path) => Some(read_ip_intelligence(&path)?),
                None => None,
            };

            let options = EvaluationOptions {
                thresholds: config.thresholds,
                session_ttl_secs: config.session_ttl_secs,
                subplebbit_public_key: None,
                inputs: EvaluationInputs {
                    ip_intelligence,
                    wallet_transaction_counts: parse_wallet_counts(&wallet_tx)?,
                    enabled_oauth_providers: config.oauth_providers.clone(),
                    weight_overrides: config.factor_weights.clone(),
                },
            };

            let evaluation =
                challenge::evaluate_publication(db.as_ref(), &request, &options, unix_now())
                    .await?;

            if json {
                let output = serde_json::json!({
                    "sessionId": evaluation.session.session_id,
                    "tier": evaluation.tier(),
                    "status": evaluation.session.status,
                    "risk": evaluation.risk,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                terminal::display_evaluation(&evaluation);
            }
        }

        Commands::Complete { session_id, failed } => {
            let db = spamward::db::open_sqlite(&config.db_path)?;
            let session =
                challenge::complete_challenge(db.as_ref(), &session_id, !failed, unix_now())
                    .await?;
            println!("Session {}: {}", session.session_id, session.status);
        }

        Commands::LinkOauth {
            session_id,
            identity,
        } => {
            let db = spamward::db::open_sqlite(&config.db_path)?;
            let session =
                challenge::record_oauth_identity(db.as_ref(), &session_id, &identity, unix_now())
                    .await?;
            println!("Session {}: {}", session.session_id, session.status);
        }

        Commands::Index => {
            let db = spamward::db::open_sqlite(&config.db_path)?;
            run_indexer(&config, db).await?;
        }

        Commands::AddSubplebbit { address } => {
            let db = spamward::db::open_sqlite(&config.db_path)?;
            let added = db
                .add_subplebbit(&address, None, DiscoverySource::Manual, unix_now())
                .await?;
            if added {
                println!("Added {address} to the crawl list");
            } else {
                println!("{address} is already known; indexing enabled");
            }
        }

        Commands::Purge => {
            let db = spamward::db::open_sqlite(&config.db_path)?;
            let purged = challenge::purge_expired_sessions(db.as_ref(), unix_now()).await?;
            println!("Purged {purged} expired session(s)");
        }

        Commands::Status => {
            if !Path::new(&config.db_path).exists() {
                println!("Database: not initialized");
                println!("\nRun `spamward init` to set up the database.");
                return Ok(());
            }
            let db = spamward::db::open_sqlite(&config.db_path)?;
            spamward::status::show(&db, &config.db_path).await?;
        }
    }

    Ok(())
}

/// Run the indexer until Ctrl-C, purging expired sessions periodically.
async fn run_indexer(config: &Config, db: Arc<dyn Database>) -> Result<()> {
    let client = GatewayClient::new(&config.gateway_url, config.poll_interval)?;
    let queue = FetchQueue::new(config.fetch_concurrency);
    let indexer = Indexer::new(db.clone(), Arc::new(client), queue);

    let subscribed = indexer.start().await?;
    println!(
        "{}",
        format!("Indexing {subscribed} forum(s) via {}. Press Ctrl-C to stop.", config.gateway_url)
            .bold()
    );

    let mut purge = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
                }
                break;
            }
            _ = purge.tick() => {
                if let Err(e) = challenge::purge_expired_sessions(db.as_ref(), unix_now()).await {
                    warn!(error = %e, "Session purge failed");
                }
            }
        }
    }

    info!("Shutting down indexer...");
    indexer.stop().await?;
    println!("Indexer stopped.");
    Ok(())
}

fn read_ip_intelligence(path: &Path) -> Result<IpIntelligence> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid IP intelligence in {}", path.display()))
}

/// Parse repeated `address=count` arguments.
fn parse_wallet_counts(args: &[String]) -> Result<HashMap<String, u64>> {
    let mut counts = HashMap::new();
    for arg in args {
        let (address, count) = arg
            .split_once('=')
            .with_context(|| format!("Expected ADDRESS=COUNT, got {arg:?}"))?;
        let count: u64 = count
            .trim()
            .parse()
            .with_context(|| format!("Transaction count for {address} is not a number"))?;
        counts.insert(address.trim().to_lowercase(), count);
    }
    Ok(counts)
}
