use std::fmt;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::jobs::CommandSpec;

/// What to do when chunks fail or their output files are missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Abort before merging if any chunk failed; a missing chunk file fails
    /// the merge.
    #[default]
    Strict,
    /// Merge whatever chunk files exist, skipping missing ones with a
    /// warning. Matches the historical shell workflow.
    Lenient,
}

/// One chunk of the fan-out: the command to run and where its output lands.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub chunk_index: usize,
    pub device_slot: String,
    pub command: CommandSpec,
    pub output_path: PathBuf,
}

/// A planned chunked run. Everything the runner needs is carried here;
/// nothing is read from the process environment.
#[derive(Debug, Clone)]
pub struct ChunkedRun {
    pub chunks: Vec<ChunkPlan>,
    pub merged_path: PathBuf,
    pub policy: MergePolicy,
    pub finalize: Option<CommandSpec>,
}

/// How one chunk's job instance ended.
#[derive(Debug)]
pub enum ChunkStatus {
    Exited(ExitStatus),
    SpawnFailed(io::Error),
}

impl ChunkStatus {
    pub fn success(&self) -> bool {
        matches!(self, ChunkStatus::Exited(status) if status.success())
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ChunkStatus::Exited(status) => status.code(),
            ChunkStatus::SpawnFailed(_) => None,
        }
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkStatus::Exited(status) => match status.code() {
                Some(code) => write!(f, "exit {code}"),
                None => write!(f, "terminated by signal"),
            },
            ChunkStatus::SpawnFailed(err) => write!(f, "spawn failed: {err}"),
        }
    }
}

/// Observed result of one chunk after the barrier.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub chunk_index: usize,
    pub device_slot: String,
    pub output_path: PathBuf,
    pub status: ChunkStatus,
    /// Bytes appended to the merged file; `None` when the chunk was skipped.
    pub bytes_merged: Option<u64>,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<ChunkOutcome>,
    pub merged_path: PathBuf,
    pub merged_bytes: u64,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("no chunks to run")]
    EmptyRun,
    #[error("chunks {0:?} exited nonzero or failed to launch")]
    ChunksFailed(Vec<usize>),
    #[error("chunk {chunk_index} output missing: {}", .path.display())]
    MissingChunkOutput { chunk_index: usize, path: PathBuf },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("finalize command exited with {0}")]
    FinalizeFailed(ExitStatus),
}

/// Run a chunked job end to end: launch every chunk, wait for all of them,
/// merge their output files in ascending chunk order, then finalize.
pub fn run_chunked(run: &ChunkedRun) -> Result<RunReport, RunnerError> {
    if run.chunks.is_empty() {
        return Err(RunnerError::EmptyRun);
    }

    // Fan-out: every chunk is launched before any chunk is waited on. A
    // spawn failure is recorded and does not stop the remaining launches.
    let mut launched = Vec::with_capacity(run.chunks.len());
    for chunk in &run.chunks {
        let spawned = chunk.command.spawn();
        match &spawned {
            Ok(child) => println!(
                "chunk {} launched pid={} device={} out={}",
                chunk.chunk_index,
                child.id(),
                chunk.device_slot,
                chunk.output_path.display()
            ),
            Err(err) => eprintln!("chunk {} failed to launch: {err}", chunk.chunk_index),
        }
        launched.push(spawned);
    }

    // Fan-in: the barrier. Children run concurrently from spawn time, so
    // waiting in launch order still blocks until every instance has exited.
    let mut outcomes = Vec::with_capacity(run.chunks.len());
    for (chunk, spawned) in run.chunks.iter().zip(launched) {
        let status = match spawned {
            Ok(mut child) => {
                let status = child.wait()?;
                let status = ChunkStatus::Exited(status);
                println!("chunk {} finished {status}", chunk.chunk_index);
                status
            }
            Err(err) => ChunkStatus::SpawnFailed(err),
        };
        outcomes.push(ChunkOutcome {
            chunk_index: chunk.chunk_index,
            device_slot: chunk.device_slot.clone(),
            output_path: chunk.output_path.clone(),
            status,
            bytes_merged: None,
        });
    }

    let failed: Vec<usize> = outcomes
        .iter()
        .filter(|o| !o.status.success())
        .map(|o| o.chunk_index)
        .collect();
    if !failed.is_empty() {
        match run.policy {
            MergePolicy::Strict => return Err(RunnerError::ChunksFailed(failed)),
            MergePolicy::Lenient => {
                eprintln!("chunks {failed:?} failed; merging what is on disk")
            }
        }
    }

    let merged_bytes = merge_outputs(run, &mut outcomes)?;
    println!(
        "merged {} chunks into {} ({merged_bytes} bytes)",
        run.chunks.len(),
        run.merged_path.display()
    );

    if let Some(finalize) = &run.finalize {
        println!("finalize: {}", finalize.render());
        let status = finalize.spawn()?.wait()?;
        if !status.success() {
            return Err(RunnerError::FinalizeFailed(status));
        }
    }

    Ok(RunReport {
        outcomes,
        merged_path: run.merged_path.clone(),
        merged_bytes,
    })
}

/// Truncate the merged file, then append each chunk file in strictly
/// ascending chunk-index order. Bytes are copied verbatim; records are never
/// parsed here. Completion order of the chunks has no bearing on this pass.
fn merge_outputs(run: &ChunkedRun, outcomes: &mut [ChunkOutcome]) -> Result<u64, RunnerError> {
    let mut order: Vec<usize> = (0..outcomes.len()).collect();
    order.sort_by_key(|&i| outcomes[i].chunk_index);

    let mut dest = File::create(&run.merged_path)?;
    let mut total = 0u64;
    for i in order {
        let outcome = &mut outcomes[i];
        if !outcome.output_path.exists() {
            match run.policy {
                MergePolicy::Strict => {
                    return Err(RunnerError::MissingChunkOutput {
                        chunk_index: outcome.chunk_index,
                        path: outcome.output_path.clone(),
                    })
                }
                MergePolicy::Lenient => {
                    eprintln!(
                        "chunk {} output missing, skipping: {}",
                        outcome.chunk_index,
                        outcome.output_path.display()
                    );
                    continue;
                }
            }
        }
        let mut src = File::open(&outcome.output_path)?;
        let copied = io::copy(&mut src, &mut dest)?;
        outcome.bytes_merged = Some(copied);
        total += copied;
    }
    Ok(total)
}
