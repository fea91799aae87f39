#![allow(clippy::missing_docs_in_private_items)]

pub mod chunking;
pub mod extract;
pub mod pipeline;
