use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::error::AppError;

mod normalize;
mod pdf;
mod stats;

pub use normalize::normalize_text;
pub use stats::{ExtractionStats, StatsSnapshot};

/// Minimum trimmed length for a PDF strategy's output to be accepted.
/// Below this the text is assumed to be noise and the next strategy runs.
pub const MIN_CONFIDENT_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Structured,
    Fast,
    Raw,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Structured => "structured",
            Self::Fast => "fast",
            Self::Raw => "raw",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategySelection {
    /// Try strategies in priority order, accepting the first confident one.
    #[default]
    Auto,
    Specific(ExtractionStrategy),
}

/// Outcome of one extraction call. When `succeeded` is true, `text` is
/// non-empty and already normalized.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub text: String,
    pub page_count: usize,
    pub strategy_used: Option<ExtractionStrategy>,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl ExtractionResult {
    fn failure(error: String) -> Self {
        ExtractionResult {
            text: String::new(),
            page_count: 0,
            strategy_used: None,
            succeeded: false,
            error: Some(error),
        }
    }
}

/// Turns document bytes into clean text. Extraction failures come back
/// inside the `ExtractionResult`; the `Err` arm is reserved for runtime
/// faults such as a failed blocking task.
#[derive(Debug, Default)]
pub struct TextExtractor {
    stats: ExtractionStats,
}

impl TextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub async fn extract(
        &self,
        bytes: Vec<u8>,
        declared_type: &str,
        selection: StrategySelection,
    ) -> Result<ExtractionResult, AppError> {
        let result = match declared_type {
            "application/pdf" => {
                let attempt =
                    tokio::task::spawn_blocking(move || run_pdf_strategies(&bytes, selection))
                        .await?;
                match attempt {
                    Ok((extraction, strategy)) => {
                        self.finish(extraction, Some(strategy))
                    }
                    Err(errors) => {
                        self.stats.record_failure();
                        ExtractionResult::failure(errors.join("; "))
                    }
                }
            }
            media_type if media_type.starts_with("text/") => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                if text.trim().is_empty() {
                    self.stats.record_failure();
                    ExtractionResult::failure("document contains no text".into())
                } else {
                    self.finish(
                        pdf::PdfExtraction {
                            text,
                            page_count: 0,
                            page_failures: 0,
                        },
                        None,
                    )
                }
            }
            other => {
                self.stats.record_failure();
                ExtractionResult::failure(format!("unsupported media type '{other}'"))
            }
        };

        Ok(result)
    }

    /// Extracts every regular file in `dir` independently. A single file
    /// failing lands in the result map without aborting the batch.
    pub async fn extract_directory(
        &self,
        dir: &Path,
        selection: StrategySelection,
    ) -> Result<HashMap<String, ExtractionResult>, AppError> {
        let mut results = HashMap::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let media_type = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_string();

            let result = match tokio::fs::read(&path).await {
                Ok(bytes) => self.extract(bytes, &media_type, selection).await?,
                Err(err) => {
                    warn!(file = %file_name, error = %err, "failed to read file for extraction");
                    self.stats.record_failure();
                    ExtractionResult::failure(format!("failed to read file: {err}"))
                }
            };
            results.insert(file_name, result);
        }

        Ok(results)
    }

    fn finish(
        &self,
        extraction: pdf::PdfExtraction,
        strategy: Option<ExtractionStrategy>,
    ) -> ExtractionResult {
        let text = normalize_text(&extraction.text);
        let characters = text.chars().count();
        self.stats.record_success(
            extraction.page_count as u64,
            characters as u64,
            extraction.page_failures as u64,
        );
        debug!(
            characters,
            pages = extraction.page_count,
            page_failures = extraction.page_failures,
            strategy = strategy.map(|s| s.to_string()).unwrap_or_else(|| "none".into()),
            "extracted document text"
        );

        ExtractionResult {
            text,
            page_count: extraction.page_count,
            strategy_used: strategy,
            succeeded: true,
            error: None,
        }
    }
}

fn run_pdf_strategies(
    bytes: &[u8],
    selection: StrategySelection,
) -> Result<(pdf::PdfExtraction, ExtractionStrategy), Vec<String>> {
    let order = match selection {
        StrategySelection::Auto => vec![
            ExtractionStrategy::Structured,
            ExtractionStrategy::Fast,
            ExtractionStrategy::Raw,
        ],
        StrategySelection::Specific(strategy) => vec![strategy],
    };

    let mut errors = Vec::new();
    for strategy in order {
        let outcome = match strategy {
            ExtractionStrategy::Structured => pdf::extract_structured(bytes),
            ExtractionStrategy::Fast => pdf::extract_fast(bytes),
            ExtractionStrategy::Raw => pdf::extract_raw(bytes),
        };
        match outcome {
            Ok(extraction) if extraction.text.trim().chars().count() >= MIN_CONFIDENT_CHARS => {
                return Ok((extraction, strategy));
            }
            Ok(_) => errors.push(format!("{strategy}: text below confidence threshold")),
            Err(err) => errors.push(format!("{strategy}: {err}")),
        }
    }

    Err(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LEASE_CLAUSE: &str = "The tenant shall maintain the premises in good repair \
and shall not sublet any portion of the premises without the prior written consent of \
the landlord, which consent shall not be unreasonably withheld.";

    #[tokio::test]
    async fn test_pdf_text_extracted_by_structured_strategy() {
        let extractor = TextExtractor::new();
        let result = extractor
            .extract(
                pdf::fixtures::single_page(LEASE_CLAUSE),
                "application/pdf",
                StrategySelection::Auto,
            )
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.strategy_used, Some(ExtractionStrategy::Structured));
        assert_eq!(result.page_count, 1);
        assert!(result.text.contains("sublet"));
        assert!(result.error.is_none());

        let stats = extractor.stats();
        assert_eq!(stats.documents_succeeded, 1);
        assert_eq!(stats.pages_processed, 1);
    }

    #[tokio::test]
    async fn test_short_structured_output_falls_back_to_next_strategy() {
        let extractor = TextExtractor::new();
        let result = extractor
            .extract(
                pdf::fixtures::with_form_xobject("See rider.", LEASE_CLAUSE),
                "application/pdf",
                StrategySelection::Auto,
            )
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.strategy_used, Some(ExtractionStrategy::Fast));
        assert!(result.text.contains("sublet"));
    }

    #[tokio::test]
    async fn test_plain_text_is_decoded_and_normalized() {
        let extractor = TextExtractor::new();
        let result = extractor
            .extract(
                "Hello   \u{201C}world\u{201D}\n\n\n\ngoodbye".into(),
                "text/plain",
                StrategySelection::Auto,
            )
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.text, "Hello \"world\"\n\ngoodbye");
        assert_eq!(result.strategy_used, None);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_media_type_fails_without_error_propagation() {
        let extractor = TextExtractor::new();
        let result = extractor
            .extract(vec![0, 1, 2], "image/png", StrategySelection::Auto)
            .await
            .unwrap();

        assert!(!result.succeeded);
        assert!(result.error.as_deref().unwrap().contains("unsupported"));
    }

    #[tokio::test]
    async fn test_empty_text_document_fails() {
        let extractor = TextExtractor::new();
        let result = extractor
            .extract("   \n ".into(), "text/plain", StrategySelection::Auto)
            .await
            .unwrap();
        assert!(!result.succeeded);
    }

    #[tokio::test]
    async fn test_malformed_pdf_reports_every_strategy() {
        let extractor = TextExtractor::new();
        let result = extractor
            .extract(
                b"not a pdf".to_vec(),
                "application/pdf",
                StrategySelection::Auto,
            )
            .await
            .unwrap();

        assert!(!result.succeeded);
        let error = result.error.unwrap();
        assert!(error.contains("structured"));
        assert!(error.contains("fast"));
        assert!(error.contains("raw"));
    }

    #[tokio::test]
    async fn test_stats_track_successes_and_failures() {
        let extractor = TextExtractor::new();
        extractor
            .extract("some real text".into(), "text/plain", StrategySelection::Auto)
            .await
            .unwrap();
        extractor
            .extract(vec![1, 2, 3], "video/mp4", StrategySelection::Auto)
            .await
            .unwrap();

        let stats = extractor.stats();
        assert_eq!(stats.documents_processed, 2);
        assert_eq!(stats.documents_succeeded, 1);
        assert_eq!(stats.documents_failed, 1);
        assert!(stats.characters_extracted > 0);

        extractor.reset_stats();
        assert_eq!(extractor.stats().documents_processed, 0);
    }

    #[tokio::test]
    async fn test_directory_batch_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.txt"))
            .unwrap()
            .write_all(b"The party of the first part agrees to the terms.")
            .unwrap();
        std::fs::File::create(dir.path().join("b.md"))
            .unwrap()
            .write_all(b"# Filing\nSubmitted under seal.")
            .unwrap();
        std::fs::File::create(dir.path().join("c.bin"))
            .unwrap()
            .write_all(&[0u8, 159, 146, 150])
            .unwrap();

        let extractor = TextExtractor::new();
        let results = extractor
            .extract_directory(dir.path(), StrategySelection::Auto)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results["a.txt"].succeeded);
        assert!(results["b.md"].succeeded);
        assert!(!results["c.bin"].succeeded);
    }
}
