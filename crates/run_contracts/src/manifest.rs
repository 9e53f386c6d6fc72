use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MERGE_MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Outcome of one chunk as recorded in the merge manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub chunk_index: usize,
    pub device_slot: String,
    /// Exit code of the chunk's job instance; absent when the instance was
    /// killed by a signal or never spawned.
    pub exit_code: Option<i32>,
    pub bytes_merged: u64,
}

/// Record of a completed ordered merge, written next to the merged file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeManifest {
    pub schema_version: u32,
    pub split: String,
    pub exp_name: String,
    pub num_chunks: usize,
    pub chunks: Vec<ChunkSummary>,
    pub merged_bytes: u64,
    pub created_unix: f64,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("num_chunks is zero")]
    EmptyRun,
    #[error("declared {declared} chunks but {actual} summaries present")]
    ChunkCountMismatch { declared: usize, actual: usize },
    #[error("chunk summaries out of order at position {0}")]
    NonAscendingChunks(usize),
    #[error("merged_bytes {merged} does not match chunk total {total}")]
    ByteTotalMismatch { merged: u64, total: u64 },
}

impl MergeManifest {
    /// Chunk summaries must be contiguous ascending from 0, match the
    /// declared count, and account for every merged byte.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.num_chunks == 0 {
            return Err(ValidationError::EmptyRun);
        }
        if self.chunks.len() != self.num_chunks {
            return Err(ValidationError::ChunkCountMismatch {
                declared: self.num_chunks,
                actual: self.chunks.len(),
            });
        }
        for (pos, chunk) in self.chunks.iter().enumerate() {
            if chunk.chunk_index != pos {
                return Err(ValidationError::NonAscendingChunks(pos));
            }
        }
        let total: u64 = self.chunks.iter().map(|c| c.bytes_merged).sum();
        if total != self.merged_bytes {
            return Err(ValidationError::ByteTotalMismatch {
                merged: self.merged_bytes,
                total,
            });
        }
        Ok(())
    }
}
