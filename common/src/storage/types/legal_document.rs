use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;

use super::chunk::DocumentCategory;
use super::serde_helpers::{deserialize_datetime, deserialize_flexible_id, serialize_datetime};
use super::StoredObject;

/// Metadata row written once per successfully ingested document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegalDocument {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub category: DocumentCategory,
    pub page_count: usize,
    pub char_count: usize,
    pub extraction_strategy: Option<String>,
    pub chunk_count: usize,
    pub user_id: String,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    pub created_at: DateTime<Utc>,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    pub updated_at: DateTime<Utc>,
}

impl StoredObject for LegalDocument {
    fn table_name() -> &'static str {
        "legal_document"
    }

    fn get_id(&self) -> &str {
        &self.id
    }
}

impl LegalDocument {
    /// Insert or replace the metadata row keyed by document id.
    pub async fn upsert(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let _: Option<LegalDocument> = db
            .client
            .upsert((Self::table_name(), self.id.as_str()))
            .content(self.clone())
            .await?;
        Ok(())
    }
}
