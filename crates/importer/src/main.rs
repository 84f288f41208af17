use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use catalogerp_core::{EntityId, UserId};
use catalogerp_infra::audit::TracingAuditSink;
use catalogerp_infra::blob::InMemoryBlobStorage;
use catalogerp_infra::cache::{CacheStore, InMemoryCacheStore};
use catalogerp_infra::{
    CascadeUpdater, CatalogConfig, CatalogContext, CatalogStore, ConflictPolicy, InMemoryCatalogStore,
    IngestionPipeline, PostgresCatalogStore,
};
use catalogerp_observability::LogFormat;

/// Bulk catalog import and maintenance.
#[derive(Parser, Debug)]
#[command(name = "catalogerp-importer", version)]
struct Cli {
    /// Acting user id recorded on every mutation
    #[arg(long, env = "CATALOG_ACTOR_ID")]
    actor: Option<UserId>,

    /// Log output: json or pretty
    #[arg(long, env = "CATALOG_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a product CSV and print the report as JSON
    Import {
        /// CSV file with a header row
        #[arg(value_name = "CSV")]
        path: PathBuf,

        /// reject | update (overrides CATALOG_CONFLICT_POLICY)
        #[arg(long)]
        conflict_policy: Option<ConflictPolicy>,
    },
    /// Rename a hierarchy entity, regenerating dependent products
    Rename {
        id: EntityId,
        name: String,
    },
    /// Create the Postgres schema (requires DATABASE_URL)
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    catalogerp_observability::init(cli.log_format);

    let mut config = CatalogConfig::from_env().context("invalid catalog configuration")?;
    if let Command::Import {
        conflict_policy: Some(policy),
        ..
    } = &cli.command
    {
        config = config.with_conflict_policy(*policy);
    }

    let actor = cli.actor.unwrap_or_else(|| {
        let actor = UserId::new();
        tracing::warn!(%actor, "no actor id given; using a fresh one");
        actor
    });

    let store = open_store(&config).await?;
    let ctx = CatalogContext::new(
        config.clone(),
        Arc::new(TracingAuditSink),
        open_cache(&config)?,
        Arc::new(InMemoryBlobStorage::default()),
    );

    match cli.command {
        Command::Import { path, .. } => {
            let file = File::open(&path).with_context(|| format!("cannot open {}", path.display()))?;
            let pipeline = IngestionPipeline::new(store, ctx);
            let report = pipeline
                .run_csv(BufReader::new(file), actor)
                .await
                .context("import rejected")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Rename { id, name } => {
            let outcome = CascadeUpdater::new(store, ctx)
                .rename(id, &name, actor)
                .await
                .context("rename failed")?;
            println!("{}", serde_json::to_string_pretty(&outcome.regenerated)?);
        }
        Command::Migrate => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to migrate")?;
            PostgresCatalogStore::connect(url).await?.migrate().await?;
            tracing::info!("schema is up to date");
        }
    }
    Ok(())
}

async fn open_store(config: &CatalogConfig) -> Result<Arc<dyn CatalogStore>> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresCatalogStore::connect(url)
                .await
                .context("cannot connect to DATABASE_URL")?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using an in-memory store");
            Ok(Arc::new(InMemoryCatalogStore::new()))
        }
    }
}

#[cfg(feature = "redis")]
fn open_cache(config: &CatalogConfig) -> Result<Arc<dyn CacheStore>> {
    match config.redis_url.as_deref() {
        Some(url) => Ok(Arc::new(catalogerp_infra::cache::RedisCacheStore::new(url)?)),
        None => Ok(Arc::new(InMemoryCacheStore::new())),
    }
}

#[cfg(not(feature = "redis"))]
fn open_cache(config: &CatalogConfig) -> Result<Arc<dyn CacheStore>> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but built without the redis feature; cache is in-memory");
    }
    Ok(Arc::new(InMemoryCacheStore::new()))
}
