use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chunk::DocumentCategory,
            legal_document::LegalDocument,
        },
        vector::{ChunkPoint, VectorIndex},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

use crate::chunking::chunk_document;
use crate::extract::{StrategySelection, TextExtractor};

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        IngestionConfig {
            chunk_size: 1000,
            chunk_overlap: 200,
            embed_batch_size: 32,
        }
    }
}

impl From<&AppConfig> for IngestionConfig {
    fn from(config: &AppConfig) -> Self {
        IngestionConfig {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            ..Default::default()
        }
    }
}

/// One document handed to the pipeline. Owned by the caller for the
/// duration of a single ingestion call; the pipeline never persists the
/// raw bytes.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub media_type: String,
    pub category: DocumentCategory,
    pub user_id: String,
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub document_id: String,
    pub file_name: String,
    pub strategy: Option<String>,
    pub page_count: usize,
    pub char_count: usize,
    pub chunk_count: usize,
    pub duration_ms: u128,
}

#[derive(Debug, Default, Serialize)]
pub struct DirectoryReport {
    pub succeeded: Vec<IngestionReport>,
    pub failed: HashMap<String, String>,
}

/// Drives extract -> chunk -> embed -> index -> metadata for one document
/// at a time.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    index: Arc<dyn VectorIndex>,
    embedder: EmbeddingProvider,
    extractor: TextExtractor,
    config: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        index: Arc<dyn VectorIndex>,
        embedder: EmbeddingProvider,
        config: IngestionConfig,
    ) -> Self {
        IngestionPipeline {
            db,
            index,
            embedder,
            extractor: TextExtractor::new(),
            config,
        }
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    pub async fn ingest_document(
        &self,
        document: RawDocument,
    ) -> Result<IngestionReport, AppError> {
        let started = Instant::now();
        let document_id = document
            .document_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let extract_started = Instant::now();
        let extraction = self
            .extractor
            .extract(document.bytes, &document.media_type, StrategySelection::Auto)
            .await?;
        if !extraction.succeeded {
            return Err(AppError::Extraction(
                extraction
                    .error
                    .unwrap_or_else(|| "no readable text".into()),
            ));
        }
        let extract_ms = extract_started.elapsed().as_millis();

        let chunks = chunk_document(
            &extraction.text,
            &document_id,
            document.category,
            self.config.chunk_size,
            self.config.chunk_overlap,
        )?;

        let embed_started = Instant::now();
        let mut points = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedder.embed_batch(texts).await?;
            for (chunk, embedding) in batch.iter().zip(vectors) {
                points.push(ChunkPoint {
                    chunk: chunk.clone(),
                    user_id: document.user_id.clone(),
                    embedding,
                });
            }
        }
        let embed_ms = embed_started.elapsed().as_millis();

        let index_started = Instant::now();
        self.index.upsert(&points).await?;
        let index_ms = index_started.elapsed().as_millis();

        let now = Utc::now();
        let metadata = LegalDocument {
            id: document_id.clone(),
            file_name: document.file_name.clone(),
            mime_type: document.media_type.clone(),
            category: document.category,
            page_count: extraction.page_count,
            char_count: extraction.text.chars().count(),
            extraction_strategy: extraction.strategy_used.map(|s| s.to_string()),
            chunk_count: chunks.len(),
            user_id: document.user_id.clone(),
            created_at: now,
            updated_at: now,
        };
        metadata.upsert(&self.db).await?;

        let report = IngestionReport {
            document_id,
            file_name: document.file_name,
            strategy: metadata.extraction_strategy.clone(),
            page_count: metadata.page_count,
            char_count: metadata.char_count,
            chunk_count: metadata.chunk_count,
            duration_ms: started.elapsed().as_millis(),
        };

        info!(
            document_id = %report.document_id,
            chunks = report.chunk_count,
            extract_ms,
            embed_ms,
            index_ms,
            total_ms = report.duration_ms,
            "document ingested"
        );

        Ok(report)
    }

    /// Ingests every regular file in `dir`. One file failing is recorded
    /// and the batch continues.
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        category: DocumentCategory,
        user_id: &str,
    ) -> Result<DirectoryReport, AppError> {
        let mut report = DirectoryReport::default();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(file = %file_name, error = %err, "failed to read file for ingestion");
                    report
                        .failed
                        .insert(file_name, format!("failed to read file: {err}"));
                    continue;
                }
            };

            let media_type = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
            let document = RawDocument {
                bytes,
                file_name: file_name.clone(),
                media_type,
                category,
                user_id: user_id.to_owned(),
                document_id: Some(document_id_for_file(&file_name)),
            };

            match self.ingest_document(document).await {
                Ok(ingested) => report.succeeded.push(ingested),
                Err(err) => {
                    warn!(file = %file_name, code = err.code(), error = %err, "file ingestion failed");
                    report.failed.insert(file_name, err.to_string());
                }
            }
        }

        Ok(report)
    }
}

/// Stable document id derived from the file name, so re-running a
/// directory ingest overwrites instead of duplicating.
fn document_id_for_file(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
