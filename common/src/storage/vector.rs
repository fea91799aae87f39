use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::chunk::{Chunk, DocumentCategory};
use crate::storage::types::serde_helpers::deserialize_flexible_id;
use crate::storage::types::StoredObject;

/// A chunk plus everything the index needs to store it.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkPoint {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub user_id: String,
    pub embedding: Vec<f32>,
}

/// One retrieval hit, scored in `[0, 1]` with higher meaning closer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct IndexFilter {
    pub user_id: String,
    pub category: Option<DocumentCategory>,
}

impl IndexFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        IndexFilter {
            user_id: user_id.into(),
            category: None,
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Write points keyed by chunk id. Re-upserting the same id replaces
    /// the row, so re-ingestion never duplicates.
    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), AppError>;

    /// Nearest neighbours for `vector`, ordered by descending score.
    /// An empty index yields `Ok(vec![])`.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<ChunkMatch>, AppError>;
}

#[derive(Clone)]
pub struct SurrealVectorIndex {
    db: Arc<SurrealDbClient>,
}

#[derive(Deserialize)]
struct QueryRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    text: String,
    source_document_id: String,
    sequence_index: usize,
    category: DocumentCategory,
    distance: f32,
}

impl SurrealVectorIndex {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        SurrealVectorIndex { db }
    }
}

#[async_trait]
impl VectorIndex for SurrealVectorIndex {
    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), AppError> {
        for point in points {
            let _: Option<Chunk> = self
                .db
                .client
                .upsert((Chunk::table_name(), point.chunk.id.as_str()))
                .content(point.clone())
                .await?;
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<ChunkMatch>, AppError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut conditions = format!("user_id = '{}'", filter.user_id);
        if let Some(category) = filter.category {
            conditions.push_str(&format!(" AND category = '{category}'"));
        }

        let closest_query = format!(
            "SELECT *, vector::distance::knn() AS distance FROM {} WHERE {conditions} AND embedding <|{top_k},40|> {vector:?} ORDER BY distance",
            Chunk::table_name()
        );

        let rows: Vec<QueryRow> = self.db.client.query(closest_query).await?.take(0)?;

        Ok(rows.into_iter().map(ChunkMatch::from).collect())
    }
}

impl From<QueryRow> for ChunkMatch {
    fn from(row: QueryRow) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("source_document_id".to_string(), row.source_document_id);
        metadata.insert("sequence_index".to_string(), row.sequence_index.to_string());
        metadata.insert("category".to_string(), row.category.to_string());

        ChunkMatch {
            chunk_id: row.id,
            content: row.text,
            metadata,
            score: distance_to_similarity(row.distance),
        }
    }
}

/// Map a knn distance onto a `[0, 1]` relevance score. Identical vectors
/// (distance 0) score 1.0 and the score decays towards 0 with distance.
pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    (1.0 / (1.0 + distance.max(0.0))).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::embedding::EmbeddingProvider;
    use uuid::Uuid;

    const DIM: usize = 16;

    async fn index_with_data() -> (SurrealVectorIndex, EmbeddingProvider) {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations(DIM as u32)
            .await
            .expect("Failed to apply migrations");

        let provider = EmbeddingProvider::new_hashed(DIM);
        let index = SurrealVectorIndex::new(Arc::new(db));

        let corpus = [
            ("doc1", DocumentCategory::Contract, "The lessee shall pay rent on the first of each month."),
            ("doc1", DocumentCategory::Contract, "Either party may terminate with thirty days notice."),
            ("doc2", DocumentCategory::Statute, "A claim must be filed within two years of accrual."),
        ];

        let mut points = Vec::new();
        for (i, (doc, category, text)) in corpus.iter().enumerate() {
            let chunk = Chunk::new(doc, i, (*text).to_string(), *category);
            let embedding = provider.embed(text).await.unwrap();
            points.push(ChunkPoint {
                chunk,
                user_id: "user1".into(),
                embedding,
            });
        }
        index.upsert(&points).await.expect("upsert");

        (index, provider)
    }

    #[tokio::test]
    async fn test_query_orders_by_descending_score() {
        let (index, provider) = index_with_data().await;

        let needle = provider
            .embed("The lessee shall pay rent on the first of each month.")
            .await
            .unwrap();
        let matches = index
            .query(&needle, 3, &IndexFilter::for_user("user1"))
            .await
            .expect("query");

        assert!(!matches.is_empty());
        assert!(matches[0].content.contains("pay rent"));
        assert!((matches[0].score - 1.0).abs() < 1e-4);
        for pair in matches.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_query_respects_user_and_category_filters() {
        let (index, provider) = index_with_data().await;
        let needle = provider.embed("rent payment terms").await.unwrap();

        let other_user = index
            .query(&needle, 3, &IndexFilter::for_user("user2"))
            .await
            .expect("query");
        assert!(other_user.is_empty());

        let statutes_only = index
            .query(
                &needle,
                3,
                &IndexFilter {
                    user_id: "user1".into(),
                    category: Some(DocumentCategory::Statute),
                },
            )
            .await
            .expect("query");
        assert!(statutes_only
            .iter()
            .all(|m| m.metadata["category"] == "statute"));
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations(DIM as u32).await.expect("migrations");
        let index = SurrealVectorIndex::new(Arc::new(db));

        let matches = index
            .query(&vec![0.1; DIM], 5, &IndexFilter::for_user("user1"))
            .await
            .expect("query");
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_same_id_replaces() {
        let (index, provider) = index_with_data().await;

        let chunk = Chunk::new("doc1", 0, "The lessee shall pay rent on the first of each month.".into(), DocumentCategory::Contract);
        let embedding = provider.embed(&chunk.text).await.unwrap();
        index
            .upsert(&[ChunkPoint {
                chunk: chunk.clone(),
                user_id: "user1".into(),
                embedding: embedding.clone(),
            }])
            .await
            .expect("re-upsert");

        let matches = index
            .query(&embedding, 10, &IndexFilter::for_user("user1"))
            .await
            .expect("query");
        let hits = matches.iter().filter(|m| m.chunk_id == chunk.id).count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_distance_to_similarity_bounds() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert!(distance_to_similarity(1.0) - 0.5 < 1e-6);
        assert_eq!(distance_to_similarity(f32::NAN), 0.0);
        assert_eq!(distance_to_similarity(-1.0), 1.0);
    }
}
