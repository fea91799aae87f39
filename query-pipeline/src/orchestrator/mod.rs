mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state_machines::core::GuardError;
use tracing::{error, info, warn};

use common::error::AppError;
use common::storage::types::chunk::DocumentCategory;
use common::storage::vector::{ChunkMatch, IndexFilter, VectorIndex};
use common::utils::config::AppConfig;
use common::utils::embedding::EmbeddingProvider;

use crate::answer::{create_chat_request, create_user_message, process_response, GeneratedAnswer};
use crate::cache::ResponseCache;
use crate::scoring::{score_matches, ConfidenceReport};

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub max_question_chars: usize,
    pub top_k: usize,
    pub provider_timeout: Duration,
    pub cache_ttl: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            max_question_chars: 4000,
            top_k: 8,
            provider_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl From<&AppConfig> for QueryConfig {
    fn from(config: &AppConfig) -> Self {
        QueryConfig {
            max_question_chars: config.max_question_chars,
            top_k: config.retrieval_top_k,
            provider_timeout: Duration::from_secs(config.provider_timeout_secs),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
        }
    }
}

/// Provider seam for the orchestrator. Production wires OpenAI and the
/// vector index behind this; tests substitute stubs.
#[async_trait]
pub trait QueryServices: Send + Sync {
    async fn embed(&self, question: &str) -> Result<Vec<f32>, AppError>;

    async fn retrieve(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<ChunkMatch>, AppError>;

    async fn generate(
        &self,
        question: &str,
        report: &ConfidenceReport,
    ) -> Result<GeneratedAnswer, AppError>;
}

pub struct DefaultQueryServices {
    embedder: EmbeddingProvider,
    index: Arc<dyn VectorIndex>,
    openai_client: Arc<Client<OpenAIConfig>>,
    query_model: String,
}

impl DefaultQueryServices {
    pub fn new(
        embedder: EmbeddingProvider,
        index: Arc<dyn VectorIndex>,
        openai_client: Arc<Client<OpenAIConfig>>,
        query_model: String,
    ) -> Self {
        DefaultQueryServices {
            embedder,
            index,
            openai_client,
            query_model,
        }
    }
}

#[async_trait]
impl QueryServices for DefaultQueryServices {
    async fn embed(&self, question: &str) -> Result<Vec<f32>, AppError> {
        self.embedder.embed(question).await
    }

    async fn retrieve(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<ChunkMatch>, AppError> {
        self.index.query(vector, top_k, filter).await
    }

    async fn generate(
        &self,
        question: &str,
        report: &ConfidenceReport,
    ) -> Result<GeneratedAnswer, AppError> {
        let user_message = create_user_message(question, &report.sources);
        let request = create_chat_request(user_message, &self.query_model)?;
        let response = self
            .openai_client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::Generation(e.to_string()))?;
        process_response(response)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Final answer payload. Also the cached representation, so it round-trips
/// through `serde_json::Value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEnvelope {
    pub answer: String,
    pub references: Vec<String>,
    pub confidence: f32,
    pub sources: Vec<ChunkMatch>,
    pub total_sources: usize,
    pub cached: bool,
    pub model: Option<String>,
    pub token_usage: Option<TokenUsage>,
    pub answered_at: DateTime<Utc>,
}

pub struct QueryOrchestrator {
    services: Arc<dyn QueryServices>,
    cache: Arc<ResponseCache>,
    config: QueryConfig,
}

impl QueryOrchestrator {
    pub fn new(
        services: Arc<dyn QueryServices>,
        cache: Arc<ResponseCache>,
        config: QueryConfig,
    ) -> Self {
        QueryOrchestrator {
            services,
            cache,
            config,
        }
    }

    /// Runs one question through the full pipeline. Validation failures
    /// reject before any provider call; a cache hit short-circuits after
    /// the cache check.
    pub async fn ask(
        &self,
        question: &str,
        user_id: &str,
        category: Option<DocumentCategory>,
    ) -> Result<AnswerEnvelope, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation("question must not be empty".into()));
        }
        if question.chars().count() > self.config.max_question_chars {
            return Err(AppError::Validation(format!(
                "question exceeds {} characters",
                self.config.max_question_chars
            )));
        }

        let machine = state::received();
        let started = Instant::now();

        let category_label = category.map(|c| c.to_string()).unwrap_or_default();
        let cache_key = ResponseCache::generate_key(
            &[question],
            &[("category", &category_label), ("user", user_id)],
        );

        let machine = machine
            .check_cache()
            .map_err(|(_, guard)| map_guard_error("check_cache", &guard))?;

        if let Some(value) = self.cache.get(&cache_key).await {
            match serde_json::from_value::<AnswerEnvelope>(value) {
                Ok(mut envelope) => {
                    let _machine = machine
                        .hit()
                        .map_err(|(_, guard)| map_guard_error("hit", &guard))?;
                    envelope.cached = true;
                    info!(
                        user_id,
                        total_ms = started.elapsed().as_millis() as u64,
                        "query answered from cache"
                    );
                    return Ok(envelope);
                }
                Err(err) => {
                    // Treat a corrupt entry as a miss and fall through.
                    warn!(code = "cache_error", error = %err, "discarding unreadable cache entry");
                    self.cache.delete(&cache_key).await;
                }
            }
        }

        let stage_start = Instant::now();
        let vector = match self
            .with_timeout("embed", self.services.embed(question))
            .await
        {
            Ok(vector) => vector,
            Err(err) => return Err(fail(machine.abort(), "embed", err)),
        };
        let machine = machine
            .embed()
            .map_err(|(_, guard)| map_guard_error("embed", &guard))?;
        let embed_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let filter = IndexFilter {
            user_id: user_id.to_owned(),
            category,
        };
        let matches = match self
            .with_timeout(
                "retrieve",
                self.services.retrieve(&vector, self.config.top_k, &filter),
            )
            .await
        {
            Ok(matches) => matches,
            Err(err) => return Err(fail(machine.abort(), "retrieve", err)),
        };
        let machine = machine
            .retrieve()
            .map_err(|(_, guard)| map_guard_error("retrieve", &guard))?;
        let retrieve_duration = stage_start.elapsed();

        let report = score_matches(&matches);
        let machine = machine
            .score()
            .map_err(|(_, guard)| map_guard_error("score", &guard))?;

        let stage_start = Instant::now();
        let generated = match self
            .with_timeout("generate", self.services.generate(question, &report))
            .await
        {
            Ok(generated) => generated,
            Err(err) => return Err(fail(machine.abort(), "generate", err)),
        };
        let machine = machine
            .generate()
            .map_err(|(_, guard)| map_guard_error("generate", &guard))?;
        let generate_duration = stage_start.elapsed();

        let envelope = AnswerEnvelope {
            answer: generated.answer,
            references: generated.references,
            confidence: report.confidence,
            sources: report.sources,
            total_sources: report.total_sources,
            cached: false,
            model: Some(generated.model),
            token_usage: Some(TokenUsage {
                prompt_tokens: generated.prompt_tokens,
                completion_tokens: generated.completion_tokens,
            }),
            answered_at: Utc::now(),
        };

        match serde_json::to_value(&envelope) {
            Ok(value) => {
                self.cache
                    .set(&cache_key, value, Some(self.config.cache_ttl))
                    .await;
            }
            Err(err) => {
                warn!(code = "cache_error", error = %err, "failed to serialize answer for caching");
            }
        }
        let _machine = machine
            .store()
            .map_err(|(_, guard)| map_guard_error("store", &guard))?;

        info!(
            user_id,
            confidence = envelope.confidence,
            sources = envelope.total_sources,
            embed_ms = embed_duration.as_millis() as u64,
            retrieve_ms = retrieve_duration.as_millis() as u64,
            generate_ms = generate_duration.as_millis() as u64,
            total_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );

        Ok(envelope)
    }

    async fn with_timeout<T>(
        &self,
        stage: &str,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.config.provider_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(stage.to_string())),
        }
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid query pipeline transition during {event}: {guard:?}"
    ))
}

/// Drives the machine to its terminal failed state and logs the stage
/// that broke before handing the error back to the caller.
fn fail<M>(
    aborted: Result<state::QueryMachine<(), state::Failed>, (M, GuardError)>,
    stage: &str,
    err: AppError,
) -> AppError {
    if let Err((_, guard)) = aborted {
        warn!(stage, ?guard, "query state machine rejected abort");
    }
    error!(stage, code = err.code(), error = %err, "query pipeline aborted");
    err
}
