use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use run_contracts::{scan_answers, ChunkSummary, MergeManifest, MERGE_MANIFEST_SCHEMA_VERSION};
use vlmrun_tools::device::DeviceList;
use vlmrun_tools::jobs::{self, EvalJob, EvalPlan};
use vlmrun_tools::runner::{self, MergePolicy, RunReport};
use vlmrun_tools::ToolConfig;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Chunked VQAv2 evaluation: shard across devices, merge, convert",
    long_about = None
)]
struct Args {
    /// Model checkpoint path; its parent directory names the experiment.
    model_path: PathBuf,
    /// Context length.
    ctx_len: usize,
    /// Vision grid size (-1 disables grid pooling).
    #[arg(allow_negative_numbers = true)]
    grid_size: i64,
    /// Embedding width.
    n_embd: usize,
    /// Layer count.
    n_layer: usize,
    /// Evaluation data root (contains eval/vqav2/).
    eval_dir: PathBuf,
    /// Vision tower name or path.
    vision_tower: String,
    /// Image position mode (first, middle or last).
    image_position: String,
    /// Benchmark split; defaults to the configured split.
    #[arg(long)]
    split: Option<String>,
    /// Comma-separated device slots; overrides CUDA_VISIBLE_DEVICES.
    #[arg(long)]
    devices: Option<String>,
    /// Merge whatever chunk files exist instead of failing on a bad chunk.
    #[arg(long, default_value_t = false)]
    best_effort: bool,
    /// Skip the submission converter after merging.
    #[arg(long, default_value_t = false)]
    skip_convert: bool,
    /// Print the planned commands and exit without launching anything.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = ToolConfig::load();
    let devices = DeviceList::resolve(args.devices.as_deref())?;
    let split = args
        .split
        .clone()
        .unwrap_or_else(|| cfg.default_split.clone());
    let policy = if args.best_effort {
        MergePolicy::Lenient
    } else {
        MergePolicy::Strict
    };

    let job = EvalJob {
        model_path: args.model_path.clone(),
        ctx_len: args.ctx_len,
        grid_size: args.grid_size,
        n_embd: args.n_embd,
        n_layer: args.n_layer,
        eval_dir: args.eval_dir.clone(),
        vision_tower: args.vision_tower.clone(),
        image_position: args.image_position.clone(),
        split,
        policy,
        convert: !args.skip_convert,
    };
    let plan = jobs::plan_eval_run(&job, &devices, &cfg)?;

    println!(
        "experiment={} split={} chunks={}",
        plan.exp_name,
        plan.layout.split,
        devices.len()
    );

    if args.dry_run {
        print_plan(&plan);
        return Ok(());
    }

    fs::create_dir_all(&plan.layout.answers_dir)?;
    let report = runner::run_chunked(&plan.run)?;
    write_manifest(&plan, &report)?;
    print_summary(&report);
    Ok(())
}

fn print_plan(plan: &EvalPlan) {
    for chunk in &plan.run.chunks {
        println!("[chunk {}] {}", chunk.chunk_index, chunk.command.render());
    }
    if let Some(finalize) = &plan.run.finalize {
        println!("[finalize] {}", finalize.render());
    }
    println!("merged output: {}", plan.run.merged_path.display());
}

fn write_manifest(plan: &EvalPlan, report: &RunReport) -> anyhow::Result<()> {
    let created_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let manifest = MergeManifest {
        schema_version: MERGE_MANIFEST_SCHEMA_VERSION,
        split: plan.layout.split.clone(),
        exp_name: plan.exp_name.clone(),
        num_chunks: report.outcomes.len(),
        chunks: report
            .outcomes
            .iter()
            .map(|o| ChunkSummary {
                chunk_index: o.chunk_index,
                device_slot: o.device_slot.clone(),
                exit_code: o.status.exit_code(),
                bytes_merged: o.bytes_merged.unwrap_or(0),
            })
            .collect(),
        merged_bytes: report.merged_bytes,
        created_unix,
    };
    let path = plan.layout.manifest_file();
    fs::write(&path, serde_json::to_vec_pretty(&manifest)?)?;
    println!("manifest written: {}", path.display());
    Ok(())
}

/// Reporting only. A scan problem is warned about, never propagated; the run
/// itself already succeeded.
fn print_summary(report: &RunReport) {
    for outcome in &report.outcomes {
        println!(
            "chunk {} device={} {} bytes={}",
            outcome.chunk_index,
            outcome.device_slot,
            outcome.status,
            outcome.bytes_merged.unwrap_or(0)
        );
    }
    let scanned = fs::File::open(&report.merged_path)
        .and_then(|file| scan_answers(io::BufReader::new(file)));
    match scanned {
        Ok(scan) => {
            println!(
                "merged answers: {} parsed, {} malformed ({} bytes)",
                scan.parsed, scan.malformed, report.merged_bytes
            );
            if scan.malformed > 0 {
                eprintln!(
                    "warning: {} lines of {} did not parse as answer records",
                    scan.malformed,
                    scan.lines()
                );
            }
        }
        Err(err) => eprintln!("could not scan merged answers: {err}"),
    }
}
