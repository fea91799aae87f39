use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::serde_helpers::{deserialize_datetime, deserialize_flexible_id, serialize_datetime};
use super::StoredObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    Contract,
    CaseLaw,
    Statute,
    Regulation,
    Filing,
    #[default]
    General,
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Contract => "contract",
            Self::CaseLaw => "case_law",
            Self::Statute => "statute",
            Self::Regulation => "regulation",
            Self::Filing => "filing",
            Self::General => "general",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for DocumentCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "contract" => Ok(Self::Contract),
            "case_law" | "caselaw" => Ok(Self::CaseLaw),
            "statute" => Ok(Self::Statute),
            "regulation" => Ok(Self::Regulation),
            "filing" => Ok(Self::Filing),
            "general" => Ok(Self::General),
            other => Err(anyhow::anyhow!("unknown document category '{other}'")),
        }
    }
}

/// One retrievable slice of a source document. Ids are content-addressed,
/// so re-ingesting the same document overwrites rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub text: String,
    pub source_document_id: String,
    pub sequence_index: usize,
    pub category: DocumentCategory,
    pub char_length: usize,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(
        source_document_id: &str,
        sequence_index: usize,
        text: String,
        category: DocumentCategory,
    ) -> Self {
        let id = deterministic_id(source_document_id, sequence_index, &text);
        let char_length = text.chars().count();
        Chunk {
            id,
            text,
            source_document_id: source_document_id.to_owned(),
            sequence_index,
            category,
            char_length,
            created_at: Utc::now(),
        }
    }
}

impl StoredObject for Chunk {
    fn table_name() -> &'static str {
        "legal_chunk"
    }

    fn get_id(&self) -> &str {
        &self.id
    }
}

fn deterministic_id(source_document_id: &str, sequence_index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_document_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(sequence_index.to_le_bytes());
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let short: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{source_document_id}_{sequence_index:04}_{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_deterministic() {
        let a = Chunk::new("doc1", 0, "the same text".into(), DocumentCategory::Contract);
        let b = Chunk::new("doc1", 0, "the same text".into(), DocumentCategory::Contract);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_chunk_id_varies_by_source_sequence_and_text() {
        let base = Chunk::new("doc1", 0, "text".into(), DocumentCategory::General);
        let other_doc = Chunk::new("doc2", 0, "text".into(), DocumentCategory::General);
        let other_seq = Chunk::new("doc1", 1, "text".into(), DocumentCategory::General);
        let other_text = Chunk::new("doc1", 0, "other".into(), DocumentCategory::General);
        assert_ne!(base.id, other_doc.id);
        assert_ne!(base.id, other_seq.id);
        assert_ne!(base.id, other_text.id);
    }

    #[test]
    fn test_char_length_counts_chars_not_bytes() {
        let chunk = Chunk::new("doc1", 0, "§ 1983 claim".into(), DocumentCategory::CaseLaw);
        assert_eq!(chunk.char_length, 12);
    }

    #[test]
    fn test_category_labels_round_trip() {
        for category in [
            DocumentCategory::Contract,
            DocumentCategory::CaseLaw,
            DocumentCategory::Statute,
            DocumentCategory::Regulation,
            DocumentCategory::Filing,
            DocumentCategory::General,
        ] {
            let parsed: DocumentCategory = category.to_string().parse().unwrap();
            assert_eq!(parsed, category);
        }
    }
}
