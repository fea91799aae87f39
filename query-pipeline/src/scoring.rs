use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use common::storage::vector::ChunkMatch;

/// Excerpts longer than this are cut and marked with an ellipsis so the
/// answer payload stays bounded.
pub const EXCERPT_MAX_CHARS: usize = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub confidence: f32,
    pub sources: Vec<ChunkMatch>,
    pub total_sources: usize,
}

impl ConfidenceReport {
    pub fn empty() -> Self {
        ConfidenceReport {
            confidence: 0.0,
            sources: Vec::new(),
            total_sources: 0,
        }
    }
}

/// Folds retrieval matches into a single confidence value plus a trimmed,
/// de-duplicated source list ordered by descending score.
///
/// The average term rewards semantic closeness; the saturating count term
/// rewards corroboration breadth, so one marginal match cannot look
/// certain on its own. No matches means confidence 0.0, not an error.
pub fn score_matches(matches: &[ChunkMatch]) -> ConfidenceReport {
    if matches.is_empty() {
        return ConfidenceReport::empty();
    }

    let mut best: HashMap<&str, &ChunkMatch> = HashMap::new();
    for candidate in matches {
        match best.get(candidate.chunk_id.as_str()) {
            Some(existing) if existing.score >= candidate.score => {}
            _ => {
                best.insert(candidate.chunk_id.as_str(), candidate);
            }
        }
    }

    let mut sources: Vec<ChunkMatch> = best
        .into_values()
        .map(|source| truncate_excerpt(source.clone()))
        .collect();
    sources.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let total_sources = sources.len();
    let avg_score = sources.iter().map(|source| source.score).sum::<f32>() / total_sources as f32;
    let source_bonus = (total_sources as f32 / 5.0).min(1.0);
    let confidence = round2(clamp_unit(0.7 * avg_score + 0.3 * source_bonus));

    ConfidenceReport {
        confidence,
        sources,
        total_sources,
    }
}

fn truncate_excerpt(mut source: ChunkMatch) -> ChunkMatch {
    if source.content.chars().count() > EXCERPT_MAX_CHARS {
        let mut cut: String = source.content.chars().take(EXCERPT_MAX_CHARS).collect();
        cut.push('\u{2026}');
        source.content = cut;
    }
    source
}

pub fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
