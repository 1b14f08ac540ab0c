//! Mailcast CLI entry point.
//!
//! Provides `init`, `preview`, `dispatch`, `cancel` and `stats` subcommands
//! over the runtime directory at `~/.mailcast/` (or `$MAILCAST_HOME`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tracing::{info, warn};

use mailcast::audience::contacts::SqliteContactRepository;
use mailcast::audience::{diagnose, AudienceResolver, RuleGroup};
use mailcast::campaign::events::SqliteEventLog;
use mailcast::campaign::store::SqliteCampaignStore;
use mailcast::campaign::{DispatchEngine, DispatchError};
use mailcast::config::{build_transport, load_config, runtime_paths, Config, RuntimePaths};
use mailcast::credentials::{enforce_private_file_permissions, load_optional_credentials};

/// Mailcast: rule-based audience targeting and bulk campaign dispatch.
#[derive(Parser)]
#[command(name = "mailcast", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Create the runtime directory, a default config and the database.
    Init,
    /// Count a tenant's contacts matching a rule group and explain dead conditions.
    Preview {
        /// Tenant whose contacts are evaluated.
        #[arg(long)]
        tenant: String,
        /// JSON file holding one rule group.
        #[arg(long)]
        rules: PathBuf,
    },
    /// Dispatch a draft or scheduled campaign to its linked segments.
    Dispatch {
        /// Campaign identifier.
        campaign_id: String,
    },
    /// Ask an in-progress dispatch to stop starting new recipients.
    Cancel {
        /// Campaign identifier.
        campaign_id: String,
    },
    /// Show sent and failed totals for a tenant.
    Stats {
        /// Tenant identifier.
        #[arg(long)]
        tenant: String,
    },
}

const DEFAULT_CONFIG: &str = r#"# Mailcast configuration.

[database]
# path = "mailcast.db"

[sender]
address = "no-reply@localhost"
default_name = "Mailcast"

[dispatch]
concurrency = 4

# Relay channels in failover order. With none configured, messages are only logged.
# [[transport.channels]]
# name = "primary"
# endpoint = "https://relay.example.com/v1/send"
# api_key_env = "MAILCAST_PRIMARY_KEY"
# timeout_secs = 30
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = runtime_paths()?;

    match cli.command {
        Command::Init => handle_init(&paths).await,
        Command::Preview { tenant, rules } => handle_preview(&paths, &tenant, &rules).await,
        Command::Dispatch { campaign_id } => handle_dispatch(&paths, &campaign_id).await,
        Command::Cancel { campaign_id } => handle_cancel(&paths, &campaign_id).await,
        Command::Stats { tenant } => handle_stats(&paths, &tenant).await,
    }
}

/// Load config and open the database it points at.
async fn open_runtime(paths: &RuntimePaths) -> anyhow::Result<(Config, SqlitePool)> {
    let config = load_config(&paths.config_toml)?;
    let db_path = config.database_path(&paths.root);
    let pool = mailcast::db::open(&db_path).await?;
    Ok((config, pool))
}

/// Create the runtime layout. Existing files are left untouched.
async fn handle_init(paths: &RuntimePaths) -> anyhow::Result<()> {
    mailcast::logging::init_cli();

    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("failed to create {}", paths.root.display()))?;
    std::fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;

    if !paths.config_toml.exists() {
        std::fs::write(&paths.config_toml, DEFAULT_CONFIG)
            .with_context(|| format!("failed to write {}", paths.config_toml.display()))?;
        info!(path = %paths.config_toml.display(), "default config written");
    }
    if !paths.env_file.exists() {
        std::fs::write(&paths.env_file, "# Relay API keys, one KEY=value per line.\n")
            .with_context(|| format!("failed to write {}", paths.env_file.display()))?;
        enforce_private_file_permissions(&paths.env_file)?;
    }

    let (config, pool) = open_runtime(paths).await?;
    pool.close().await;

    println!("initialised {}", paths.root.display());
    println!("database: {}", config.database_path(&paths.root).display());
    Ok(())
}

async fn handle_preview(paths: &RuntimePaths, tenant: &str, rules: &Path) -> anyhow::Result<()> {
    mailcast::logging::init_cli();

    let raw = std::fs::read_to_string(rules)
        .with_context(|| format!("failed to read rules at {}", rules.display()))?;
    let group: RuleGroup = serde_json::from_str(&raw)
        .with_context(|| format!("invalid rule group in {}", rules.display()))?;

    let (_config, pool) = open_runtime(paths).await?;
    let resolver = AudienceResolver::new(Arc::new(SqliteContactRepository::new(pool.clone())));
    let count = resolver.preview_count(&group, tenant).await;

    println!("matching contacts: {count}");
    for problem in diagnose(&group) {
        println!("  never matches: {problem}");
    }
    pool.close().await;
    Ok(())
}

async fn handle_dispatch(paths: &RuntimePaths, campaign_id: &str) -> anyhow::Result<()> {
    let _logging_guard = mailcast::logging::init_production(&paths.logs_dir)?;

    let (config, pool) = open_runtime(paths).await?;
    let credentials = load_optional_credentials(&paths.env_file)
        .with_context(|| format!("failed to load {}", paths.env_file.display()))?;
    let transport = build_transport(&config, &credentials)?;

    let engine = DispatchEngine::new(
        Arc::new(SqliteCampaignStore::new(pool.clone())),
        AudienceResolver::new(Arc::new(SqliteContactRepository::new(pool.clone()))),
        Arc::new(transport),
        Arc::new(SqliteEventLog::new(pool.clone())),
        config.dispatch.concurrency,
    )
    .with_default_sender_name(config.sender.default_name.clone());

    let result = engine.execute(campaign_id).await;
    pool.close().await;

    match result {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(DispatchError::Finalize { report, source }) => {
            warn!(campaign_id, error = %source, "dispatch not finalized");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Err(anyhow::anyhow!("campaign {campaign_id} was not marked completed: {source}"))
        }
        Err(e) => Err(e).with_context(|| format!("dispatch of {campaign_id} failed")),
    }
}

async fn handle_cancel(paths: &RuntimePaths, campaign_id: &str) -> anyhow::Result<()> {
    mailcast::logging::init_cli();

    let (_config, pool) = open_runtime(paths).await?;
    let store = SqliteCampaignStore::new(pool.clone());
    let result = store.request_cancel(campaign_id).await;
    pool.close().await;
    result.with_context(|| format!("failed to cancel {campaign_id}"))?;

    println!("cancellation requested for {campaign_id}");
    Ok(())
}

async fn handle_stats(paths: &RuntimePaths, tenant: &str) -> anyhow::Result<()> {
    mailcast::logging::init_cli();

    let (_config, pool) = open_runtime(paths).await?;
    let events = SqliteEventLog::new(pool.clone());
    let store = SqliteCampaignStore::new(pool.clone());

    let stats = events.tenant_stats(tenant).await?;
    let campaigns = store.list_campaigns(tenant).await?;
    pool.close().await;

    println!("tenant {tenant}: sent {} failed {}", stats.sent, stats.failed);
    for campaign in campaigns {
        println!(
            "  {}  {:<10} {}",
            campaign.id,
            campaign.status.as_str(),
            campaign.name
        );
    }
    Ok(())
}
