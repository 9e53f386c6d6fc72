use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use thiserror::Error;

use crate::config::ToolConfig;
use crate::device::{DeviceList, DEVICE_LIST_VAR};
use crate::layout::{self, EvalLayout};
use crate::runner::{ChunkPlan, ChunkedRun, MergePolicy};

/// A fully resolved external command: program, arguments, and environment
/// overrides applied on top of the inherited environment.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn spawn(&self) -> io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, val) in &self.envs {
            cmd.env(key, val);
        }
        cmd.spawn()
    }

    /// Shell-style rendering for status lines and dry runs.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        for (key, val) in &self.envs {
            parts.push(format!("{key}=\"{val}\""));
        }
        parts.push(self.program.display().to_string());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: impl ToString) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("cannot derive experiment name from model path {}", .0.display())]
    ExpName(PathBuf),
}

/// Static parameters for one chunked evaluation run. Chunk index and chunk
/// count are filled in per instance at fan-out time.
#[derive(Debug, Clone)]
pub struct EvalJob {
    pub model_path: PathBuf,
    pub ctx_len: usize,
    pub grid_size: i64,
    pub n_embd: usize,
    pub n_layer: usize,
    pub eval_dir: PathBuf,
    pub vision_tower: String,
    pub image_position: String,
    pub split: String,
    pub policy: MergePolicy,
    pub convert: bool,
}

/// A planned evaluation: derived run metadata plus the runner input.
#[derive(Debug, Clone)]
pub struct EvalPlan {
    pub exp_name: String,
    pub layout: EvalLayout,
    pub run: ChunkedRun,
}

/// Instantiate the evaluation job once per device slot. Slot `i` carries
/// chunk index `i`; nothing is launched here.
pub fn plan_eval_run(
    job: &EvalJob,
    devices: &DeviceList,
    cfg: &ToolConfig,
) -> Result<EvalPlan, PlanError> {
    let exp_name = layout::exp_name(&job.model_path)
        .ok_or_else(|| PlanError::ExpName(job.model_path.clone()))?;
    let layout = EvalLayout::new(&job.eval_dir, &job.split, &exp_name);
    let num_chunks = devices.len();

    let mut chunks = Vec::with_capacity(num_chunks);
    for (chunk_index, slot) in devices.slots().iter().enumerate() {
        let output_path = layout.chunk_file(num_chunks, chunk_index);
        let command =
            inference_command(job, cfg, &layout, num_chunks, chunk_index, slot, &output_path);
        chunks.push(ChunkPlan {
            chunk_index,
            device_slot: slot.clone(),
            command,
            output_path,
        });
    }

    let finalize = job.convert.then(|| convert_command(cfg, &layout, &exp_name));

    Ok(EvalPlan {
        exp_name,
        run: ChunkedRun {
            chunks,
            merged_path: layout.merged_file(),
            policy: job.policy,
            finalize,
        },
        layout,
    })
}

fn inference_command(
    job: &EvalJob,
    cfg: &ToolConfig,
    layout: &EvalLayout,
    num_chunks: usize,
    chunk_index: usize,
    device_slot: &str,
    output_path: &Path,
) -> CommandSpec {
    let mut args = Vec::new();
    args.push(cfg.eval_script.display().to_string());
    push_flag(&mut args, "--model_path", job.model_path.display());
    push_flag(&mut args, "--ctx_len", job.ctx_len);
    push_flag(&mut args, "--grid_size", job.grid_size);
    push_flag(&mut args, "--n_embd", job.n_embd);
    push_flag(&mut args, "--n_layer", job.n_layer);
    push_flag(&mut args, "--eval_dir", job.eval_dir.display());
    push_flag(&mut args, "--vision_tower_name", &job.vision_tower);
    push_flag(&mut args, "--image_position", &job.image_position);
    push_flag(&mut args, "--question_file", layout.question_file().display());
    push_flag(&mut args, "--image_folder", layout.image_folder().display());
    push_flag(&mut args, "--answers_file", output_path.display());
    push_flag(&mut args, "--num_chunks", num_chunks);
    push_flag(&mut args, "--chunk_idx", chunk_index);
    CommandSpec {
        program: cfg.python_bin.clone(),
        args,
        envs: vec![(DEVICE_LIST_VAR.to_string(), device_slot.to_string())],
    }
}

fn convert_command(cfg: &ToolConfig, layout: &EvalLayout, exp_name: &str) -> CommandSpec {
    let mut args = Vec::new();
    args.push(cfg.convert_script.display().to_string());
    push_flag(&mut args, "--dir", layout.eval_root.display());
    push_flag(&mut args, "--split", &layout.split);
    push_flag(&mut args, "--ckpt", exp_name);
    CommandSpec {
        program: cfg.python_bin.clone(),
        args,
        envs: Vec::new(),
    }
}

/// Parameters for the single-process training workflow.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub load_model: Option<PathBuf>,
    pub proj_dir: PathBuf,
    pub data_file: PathBuf,
    pub data_type: String,
    pub image_folder: PathBuf,
    pub vision_tower: String,
    pub image_position: String,
    pub vocab_size: usize,
    pub ctx_len: usize,
    pub n_layer: usize,
    pub n_embd: usize,
    pub grid_size: i64,
    pub epoch_steps: usize,
    pub epoch_count: usize,
    pub epoch_begin: usize,
    pub epoch_save: usize,
    pub micro_bsz: usize,
    pub accumulate_grad_batches: usize,
    pub lr_init: f64,
    pub lr_final: f64,
    pub warmup_steps: i64,
    pub beta1: f64,
    pub beta2: f64,
    pub adam_eps: f64,
    pub accelerator: String,
    pub devices: usize,
    pub precision: String,
    pub strategy: String,
    pub grad_cp: bool,
    pub freeze_rwkv: bool,
    pub freeze_proj: bool,
}

/// Build the training command. One process, no fan-out.
pub fn train_command(opts: &TrainOptions, cfg: &ToolConfig) -> CommandSpec {
    let mut args = Vec::new();
    args.push(cfg.train_script.display().to_string());
    if let Some(load_model) = &opts.load_model {
        push_flag(&mut args, "--load_model", load_model.display());
    }
    push_flag(&mut args, "--proj_dir", opts.proj_dir.display());
    push_flag(&mut args, "--data_file", opts.data_file.display());
    push_flag(&mut args, "--data_type", &opts.data_type);
    push_flag(&mut args, "--image_folder", opts.image_folder.display());
    push_flag(&mut args, "--vision_tower_name", &opts.vision_tower);
    push_flag(&mut args, "--image_position", &opts.image_position);
    push_flag(&mut args, "--vocab_size", opts.vocab_size);
    push_flag(&mut args, "--ctx_len", opts.ctx_len);
    push_flag(&mut args, "--n_layer", opts.n_layer);
    push_flag(&mut args, "--n_embd", opts.n_embd);
    push_flag(&mut args, "--grid_size", opts.grid_size);
    push_flag(&mut args, "--epoch_steps", opts.epoch_steps);
    push_flag(&mut args, "--epoch_count", opts.epoch_count);
    push_flag(&mut args, "--epoch_begin", opts.epoch_begin);
    push_flag(&mut args, "--epoch_save", opts.epoch_save);
    push_flag(&mut args, "--micro_bsz", opts.micro_bsz);
    push_flag(
        &mut args,
        "--accumulate_grad_batches",
        opts.accumulate_grad_batches,
    );
    push_flag(&mut args, "--lr_init", opts.lr_init);
    push_flag(&mut args, "--lr_final", opts.lr_final);
    push_flag(&mut args, "--warmup_steps", opts.warmup_steps);
    push_flag(&mut args, "--beta1", opts.beta1);
    push_flag(&mut args, "--beta2", opts.beta2);
    push_flag(&mut args, "--adam_eps", opts.adam_eps);
    push_flag(&mut args, "--accelerator", &opts.accelerator);
    push_flag(&mut args, "--devices", opts.devices);
    push_flag(&mut args, "--precision", &opts.precision);
    push_flag(&mut args, "--strategy", &opts.strategy);
    push_flag(&mut args, "--grad_cp", opts.grad_cp as u8);
    push_flag(&mut args, "--freeze_rwkv", opts.freeze_rwkv as u8);
    push_flag(&mut args, "--freeze_proj", opts.freeze_proj as u8);
    CommandSpec {
        program: cfg.python_bin.clone(),
        args,
        envs: Vec::new(),
    }
}
