use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide extraction counters. Monotonic, lock-free, resettable only
/// through `reset`.
#[derive(Debug, Default)]
pub struct ExtractionStats {
    documents_processed: AtomicU64,
    documents_succeeded: AtomicU64,
    documents_failed: AtomicU64,
    pages_processed: AtomicU64,
    characters_extracted: AtomicU64,
    page_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub documents_processed: u64,
    pub documents_succeeded: u64,
    pub documents_failed: u64,
    pub pages_processed: u64,
    pub characters_extracted: u64,
    pub page_failures: u64,
}

impl ExtractionStats {
    pub fn record_success(&self, pages: u64, characters: u64, page_failures: u64) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.documents_succeeded.fetch_add(1, Ordering::Relaxed);
        self.pages_processed.fetch_add(pages, Ordering::Relaxed);
        self.characters_extracted
            .fetch_add(characters, Ordering::Relaxed);
        self.page_failures.fetch_add(page_failures, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_succeeded: self.documents_succeeded.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            pages_processed: self.pages_processed.load(Ordering::Relaxed),
            characters_extracted: self.characters_extracted.load(Ordering::Relaxed),
            page_failures: self.page_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.documents_processed.store(0, Ordering::Relaxed);
        self.documents_succeeded.store(0, Ordering::Relaxed);
        self.documents_failed.store(0, Ordering::Relaxed);
        self.pages_processed.store(0, Ordering::Relaxed);
        self.characters_extracted.store(0, Ordering::Relaxed);
        self.page_failures.store(0, Ordering::Relaxed);
    }
}
