#![allow(clippy::missing_docs_in_private_items)]

pub mod answer;
pub mod cache;
pub mod orchestrator;
pub mod scoring;
