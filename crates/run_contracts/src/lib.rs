//! Shared data contracts for evaluation runs: answer records and merge manifests.

pub mod answers;
pub mod manifest;

pub use answers::{scan_answers, AnswerRecord, AnswerScan};
pub use manifest::{ChunkSummary, MergeManifest, ValidationError, MERGE_MANIFEST_SCHEMA_VERSION};
