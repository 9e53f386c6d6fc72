use std::fs;
use std::path::PathBuf;

use clap::Parser;
use vlmrun_tools::jobs::{self, TrainOptions};
use vlmrun_tools::ToolConfig;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Launch a single training run (one process, no fan-out)",
    long_about = None
)]
struct Args {
    /// Base checkpoint to start from; omit to train from scratch.
    #[arg(long)]
    load_model: Option<PathBuf>,
    /// Output directory for checkpoints.
    #[arg(long, default_value = "out")]
    proj_dir: PathBuf,
    /// Training data file.
    #[arg(long)]
    data_file: PathBuf,
    /// Training data format.
    #[arg(long, default_value = "json")]
    data_type: String,
    /// Image folder referenced by the data file.
    #[arg(long, default_value = "images")]
    image_folder: PathBuf,
    /// Vision tower name or path.
    #[arg(long, default_value = "openai/clip-vit-base-patch32")]
    vision_tower: String,
    /// Image position mode (first, middle or last).
    #[arg(long, default_value = "first")]
    image_position: String,
    /// Vocabulary size.
    #[arg(long, default_value_t = 65536)]
    vocab_size: usize,
    /// Context length.
    #[arg(long, default_value_t = 1024)]
    ctx_len: usize,
    /// Layer count.
    #[arg(long, default_value_t = 24)]
    n_layer: usize,
    /// Embedding width.
    #[arg(long, default_value_t = 2048)]
    n_embd: usize,
    /// Vision grid size (-1 disables grid pooling).
    #[arg(long, default_value_t = 8, allow_negative_numbers = true)]
    grid_size: i64,
    /// Steps per epoch.
    #[arg(long, default_value_t = 1000)]
    epoch_steps: usize,
    /// Number of epochs.
    #[arg(long, default_value_t = 1)]
    epoch_count: usize,
    /// Epoch index to resume from.
    #[arg(long, default_value_t = 0)]
    epoch_begin: usize,
    /// Save a checkpoint every N epochs.
    #[arg(long, default_value_t = 1)]
    epoch_save: usize,
    /// Micro batch size per device.
    #[arg(long, default_value_t = 8)]
    micro_bsz: usize,
    /// Gradient accumulation steps.
    #[arg(long, default_value_t = 1)]
    accumulate_grad_batches: usize,
    /// Initial learning rate.
    #[arg(long, default_value_t = 6e-4)]
    lr_init: f64,
    /// Final learning rate.
    #[arg(long, default_value_t = 6e-5)]
    lr_final: f64,
    /// Warmup steps (-1 lets the trainer pick).
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    warmup_steps: i64,
    /// Adam beta1.
    #[arg(long, default_value_t = 0.9)]
    beta1: f64,
    /// Adam beta2.
    #[arg(long, default_value_t = 0.99)]
    beta2: f64,
    /// Adam epsilon.
    #[arg(long, default_value_t = 1e-8)]
    adam_eps: f64,
    /// Trainer accelerator.
    #[arg(long, default_value = "gpu")]
    accelerator: String,
    /// Trainer device count.
    #[arg(long, default_value_t = 1)]
    devices: usize,
    /// Numeric precision.
    #[arg(long, default_value = "bf16")]
    precision: String,
    /// Distributed training strategy.
    #[arg(long, default_value = "deepspeed_stage_1")]
    strategy: String,
    /// Enable gradient checkpointing.
    #[arg(long, default_value_t = false)]
    grad_cp: bool,
    /// Freeze the language backbone.
    #[arg(long, default_value_t = false)]
    freeze_rwkv: bool,
    /// Freeze the vision projection.
    #[arg(long, default_value_t = false)]
    freeze_proj: bool,
    /// Print the training command and exit without launching it.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = ToolConfig::load();
    let opts = TrainOptions {
        load_model: args.load_model.clone(),
        proj_dir: args.proj_dir.clone(),
        data_file: args.data_file.clone(),
        data_type: args.data_type.clone(),
        image_folder: args.image_folder.clone(),
        vision_tower: args.vision_tower.clone(),
        image_position: args.image_position.clone(),
        vocab_size: args.vocab_size,
        ctx_len: args.ctx_len,
        n_layer: args.n_layer,
        n_embd: args.n_embd,
        grid_size: args.grid_size,
        epoch_steps: args.epoch_steps,
        epoch_count: args.epoch_count,
        epoch_begin: args.epoch_begin,
        epoch_save: args.epoch_save,
        micro_bsz: args.micro_bsz,
        accumulate_grad_batches: args.accumulate_grad_batches,
        lr_init: args.lr_init,
        lr_final: args.lr_final,
        warmup_steps: args.warmup_steps,
        beta1: args.beta1,
        beta2: args.beta2,
        adam_eps: args.adam_eps,
        accelerator: args.accelerator.clone(),
        devices: args.devices,
        precision: args.precision.clone(),
        strategy: args.strategy.clone(),
        grad_cp: args.grad_cp,
        freeze_rwkv: args.freeze_rwkv,
        freeze_proj: args.freeze_proj,
    };
    let cmd = jobs::train_command(&opts, &cfg);

    if args.dry_run {
        println!("{}", cmd.render());
        return Ok(());
    }

    fs::create_dir_all(&opts.proj_dir)?;
    println!("training: {}", cmd.render());
    let status = cmd.spawn()?.wait()?;
    if !status.success() {
        anyhow::bail!("training exited with {status}");
    }
    println!("training complete; checkpoints in {}", opts.proj_dir.display());
    Ok(())
}
