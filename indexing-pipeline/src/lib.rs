#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunking;
pub mod clustering;
pub mod embedding;
pub mod extraction;
pub mod pipeline;
pub mod reporting;
pub mod summarization;
pub mod tokenizer;

pub use pipeline::{default_workflows, drive, load_input_documents, PipelineRunContext, PipelineRunResult, Workflow};
