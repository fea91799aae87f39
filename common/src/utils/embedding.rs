use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use anyhow::anyhow;
use async_openai::{config::OpenAIConfig, error::OpenAIError, types::CreateEmbeddingRequestArgs, Client};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    OpenAI,
    Hashed,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "hashed" => Ok(Self::Hashed),
            other => Err(anyhow!(
                "unknown embedding backend '{other}'. Expected 'openai' or 'hashed'."
            )),
        }
    }
}

/// Turns text into fixed-dimension vectors. The `Hashed` backend is
/// deterministic and offline, used in tests and local development.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let backend = config.embedding_backend.parse::<EmbeddingBackend>()?;
        match backend {
            EmbeddingBackend::OpenAI => {
                let openai_config = OpenAIConfig::new()
                    .with_api_key(config.openai_api_key.clone())
                    .with_api_base(config.openai_base_url.clone());
                Ok(Self::new_openai(
                    Arc::new(Client::with_config(openai_config)),
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                ))
            }
            EmbeddingBackend::Hashed => {
                Ok(Self::new_hashed(config.embedding_dimensions as usize))
            }
        }
    }

    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        }
    }

    pub fn new_hashed(dimension: usize) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => *dimension,
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.inner {
            EmbeddingInner::OpenAI { model, .. } => Some(model.clone()),
            EmbeddingInner::Hashed { .. } => None,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let vectors = self.embed_batch(vec![text.to_owned()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Embedding("provider returned no embedding for input".into()))
    }

    /// Embed a batch atomically: any provider failure or a count mismatch
    /// fails the whole batch, so no partial batch is ever indexed.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let vectors: Vec<Vec<f32>> = match &self.inner {
            EmbeddingInner::Hashed { dimension } => texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect(),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
                Retry::spawn(strategy, || async {
                    let request = CreateEmbeddingRequestArgs::default()
                        .model(model.clone())
                        .input(texts.clone())
                        .dimensions(*dimensions)
                        .build()?;

                    let response = client.embeddings().create(request).await?;

                    Ok::<_, OpenAIError>(
                        response
                            .data
                            .into_iter()
                            .map(|item| item.embedding)
                            .collect(),
                    )
                })
                .await
                .map_err(|err| AppError::Embedding(err.to_string()))?
            }
        };

        check_batch_count(expected, vectors.len())?;

        debug!(
            count = vectors.len(),
            backend = self.backend_label(),
            "generated embedding batch"
        );

        Ok(vectors)
    }
}

/// Guard for atomic batches: a provider returning a different number of
/// vectors than inputs fails the whole batch.
fn check_batch_count(expected: usize, returned: usize) -> Result<(), AppError> {
    if returned != expected {
        return Err(AppError::Embedding(format!(
            "expected {expected} embeddings, provider returned {returned}"
        )));
    }
    Ok(())
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    for token in tokens(text) {
        let idx = bucket(&token, dim);
        vector[idx] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}
