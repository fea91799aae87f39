use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{
    storage::{db::SurrealDbClient, types::chunk::DocumentCategory, vector::SurrealVectorIndex},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::pipeline::{IngestionConfig, IngestionPipeline};
use query_pipeline::{
    cache::{spawn_sweeper, ResponseCache},
    orchestrator::{DefaultQueryServices, QueryConfig, QueryOrchestrator},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOCAL_USER_ID: &str = "local";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure db is initialized with the configured vector dimensions
    db.apply_migrations(config.embedding_dimensions).await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = EmbeddingProvider::from_config(&config)?;
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let index = Arc::new(SurrealVectorIndex::new(db.clone()));

    let cache = Arc::new(ResponseCache::new(
        Duration::from_secs(config.cache_ttl_secs),
        config.cache_max_entries,
    ));
    let sweeper = spawn_sweeper(
        cache.clone(),
        Duration::from_secs(config.cache_sweep_interval_secs),
    );

    let ingestion = IngestionPipeline::new(
        db.clone(),
        index.clone(),
        embedding_provider.clone(),
        IngestionConfig::from(&config),
    );

    let data_dir = Path::new(&config.data_dir);
    if data_dir.is_dir() {
        info!(data_dir = %data_dir.display(), "Ingesting documents");
        let report = ingestion
            .ingest_directory(data_dir, DocumentCategory::General, LOCAL_USER_ID)
            .await?;
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Directory ingestion complete"
        );
        for (file, reason) in &report.failed {
            warn!(file, reason, "Document was not ingested");
        }
    } else {
        info!(data_dir = %data_dir.display(), "Data directory not found, skipping ingestion");
    }

    let services = Arc::new(DefaultQueryServices::new(
        embedding_provider,
        index,
        openai_client,
        config.query_model.clone(),
    ));
    let orchestrator = QueryOrchestrator::new(services, cache.clone(), QueryConfig::from(&config));

    info!("Ready. Type a question and press enter (ctrl-c to exit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(question) = line? else { break };
                if question.trim().is_empty() {
                    continue;
                }
                match orchestrator.ask(&question, LOCAL_USER_ID, None).await {
                    Ok(envelope) => println!("{}", serde_json::to_string_pretty(&envelope)?),
                    Err(err) => warn!(code = err.code(), error = %err, "Query failed"),
                }
            }
        }
    }

    info!("Shutting down");
    sweeper.shutdown().await;

    Ok(())
}
