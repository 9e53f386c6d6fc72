use std::path::{Path, PathBuf};

use vlmrun_tools::device::{DeviceList, DeviceListError};
use vlmrun_tools::jobs::{plan_eval_run, train_command, EvalJob, PlanError, TrainOptions};
use vlmrun_tools::layout::{exp_name, EvalLayout};
use vlmrun_tools::runner::MergePolicy;
use vlmrun_tools::ToolConfig;

fn sample_job(eval_dir: &Path) -> EvalJob {
    EvalJob {
        model_path: PathBuf::from("/runs/rwkv7b-mix665k/rwkv-14.pth"),
        ctx_len: 2048,
        grid_size: 8,
        n_embd: 2048,
        n_layer: 24,
        eval_dir: eval_dir.to_path_buf(),
        vision_tower: "openai/clip-vit-base-patch32".to_string(),
        image_position: "first".to_string(),
        split: "llava_vqav2_mscoco_test-dev2015".to_string(),
        policy: MergePolicy::Strict,
        convert: true,
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[test]
fn device_list_defaults_to_single_slot() {
    assert_eq!(DeviceList::default().slots(), ["0"]);
    let explicit = DeviceList::resolve(Some("1,3")).expect("explicit list");
    assert_eq!(explicit.slots(), ["1", "3"]);
}

#[test]
fn device_list_parses_and_preserves_order() {
    let list = DeviceList::parse("2,0,1").expect("parse");
    assert_eq!(list.len(), 3);
    assert_eq!(list.slots(), ["2", "0", "1"]);

    let padded = DeviceList::parse(" 0 , 1 ").expect("parse padded");
    assert_eq!(padded.slots(), ["0", "1"]);
}

#[test]
fn device_list_rejects_blank_and_empty_items() {
    assert_eq!(DeviceList::parse(""), Err(DeviceListError::Empty));
    assert_eq!(DeviceList::parse("   "), Err(DeviceListError::Empty));
    assert_eq!(DeviceList::parse("0,,1"), Err(DeviceListError::EmptySlot(1)));
}

#[test]
fn exp_name_is_parent_directory_name() {
    assert_eq!(
        exp_name(Path::new("/runs/rwkv7b-mix665k/rwkv-14.pth")).as_deref(),
        Some("rwkv7b-mix665k")
    );
    assert_eq!(
        exp_name(Path::new("runs/exp1/model.pth")).as_deref(),
        Some("exp1")
    );
}

#[test]
fn exp_name_requires_parent_directory() {
    assert_eq!(exp_name(Path::new("model.pth")), None);
    assert_eq!(exp_name(Path::new("/model.pth")), None);
}

#[test]
fn chunk_paths_follow_answers_layout() {
    let layout = EvalLayout::new(Path::new("/data"), "split-a", "exp1");
    assert_eq!(
        layout.answers_dir,
        PathBuf::from("/data/eval/vqav2/answers/split-a/exp1")
    );
    assert_eq!(
        layout.chunk_file(4, 2),
        layout.answers_dir.join("4_2.jsonl")
    );
    assert_eq!(layout.merged_file(), layout.answers_dir.join("merge.jsonl"));
    assert_eq!(
        layout.manifest_file(),
        layout.answers_dir.join("merge_manifest.json")
    );
    assert_eq!(
        layout.question_file(),
        PathBuf::from("/data/eval/vqav2/split-a.jsonl")
    );
    assert_eq!(
        layout.image_folder(),
        PathBuf::from("/data/eval/vqav2/test2015")
    );
}

#[test]
fn plan_launches_one_chunk_per_slot() {
    let cfg = ToolConfig::default();
    let devices = DeviceList::parse("0,1,2,3").expect("parse");
    let plan = plan_eval_run(&sample_job(Path::new("/data")), &devices, &cfg).expect("plan");

    assert_eq!(plan.exp_name, "rwkv7b-mix665k");
    assert_eq!(plan.run.chunks.len(), 4);
    for (i, chunk) in plan.run.chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
        assert_eq!(chunk.device_slot, i.to_string());
        let args = &chunk.command.args;
        assert_eq!(flag_value(args, "--chunk_idx"), Some(i.to_string().as_str()));
        assert_eq!(flag_value(args, "--num_chunks"), Some("4"));
        assert_eq!(
            flag_value(args, "--answers_file"),
            Some(chunk.output_path.display().to_string().as_str())
        );
        assert!(chunk.output_path.ends_with(format!("4_{i}.jsonl")));
        assert_eq!(
            chunk.command.envs,
            vec![("CUDA_VISIBLE_DEVICES".to_string(), i.to_string())]
        );
    }
}

#[test]
fn scrambled_device_list_keeps_chunk_order() {
    let cfg = ToolConfig::default();
    let devices = DeviceList::parse("2,0,1").expect("parse");
    let plan = plan_eval_run(&sample_job(Path::new("/data")), &devices, &cfg).expect("plan");

    let bindings: Vec<(usize, &str)> = plan
        .run
        .chunks
        .iter()
        .map(|c| (c.chunk_index, c.device_slot.as_str()))
        .collect();
    assert_eq!(bindings, vec![(0, "2"), (1, "0"), (2, "1")]);
    for chunk in &plan.run.chunks {
        assert_eq!(
            chunk.command.envs,
            vec![(
                "CUDA_VISIBLE_DEVICES".to_string(),
                chunk.device_slot.clone()
            )]
        );
    }
}

#[test]
fn single_device_plan_is_one_chunk() {
    let cfg = ToolConfig::default();
    let devices = DeviceList::default();
    let plan = plan_eval_run(&sample_job(Path::new("/data")), &devices, &cfg).expect("plan");
    assert_eq!(plan.run.chunks.len(), 1);
    assert_eq!(plan.run.chunks[0].chunk_index, 0);
    assert!(plan.run.chunks[0].output_path.ends_with("1_0.jsonl"));
}

#[test]
fn inference_command_carries_model_params() {
    let cfg = ToolConfig::default();
    let devices = DeviceList::default();
    let plan = plan_eval_run(&sample_job(Path::new("/data")), &devices, &cfg).expect("plan");

    let cmd = &plan.run.chunks[0].command;
    assert_eq!(cmd.program, PathBuf::from("python"));
    assert_eq!(cmd.args[0], "evaluate.py");
    let args = &cmd.args;
    assert_eq!(
        flag_value(args, "--model_path"),
        Some("/runs/rwkv7b-mix665k/rwkv-14.pth")
    );
    assert_eq!(flag_value(args, "--ctx_len"), Some("2048"));
    assert_eq!(flag_value(args, "--grid_size"), Some("8"));
    assert_eq!(flag_value(args, "--n_embd"), Some("2048"));
    assert_eq!(flag_value(args, "--n_layer"), Some("24"));
    assert_eq!(flag_value(args, "--eval_dir"), Some("/data"));
    assert_eq!(
        flag_value(args, "--vision_tower_name"),
        Some("openai/clip-vit-base-patch32")
    );
    assert_eq!(flag_value(args, "--image_position"), Some("first"));
    assert_eq!(
        flag_value(args, "--question_file"),
        Some("/data/eval/vqav2/llava_vqav2_mscoco_test-dev2015.jsonl")
    );
    assert_eq!(
        flag_value(args, "--image_folder"),
        Some("/data/eval/vqav2/test2015")
    );
}

#[test]
fn converter_receives_split_and_checkpoint() {
    let cfg = ToolConfig::default();
    let devices = DeviceList::default();
    let plan = plan_eval_run(&sample_job(Path::new("/data")), &devices, &cfg).expect("plan");

    let finalize = plan.run.finalize.as_ref().expect("converter planned");
    assert_eq!(finalize.args[0], "eval/convert_vqav2_for_submission.py");
    assert_eq!(flag_value(&finalize.args, "--dir"), Some("/data/eval/vqav2"));
    assert_eq!(
        flag_value(&finalize.args, "--split"),
        Some("llava_vqav2_mscoco_test-dev2015")
    );
    assert_eq!(flag_value(&finalize.args, "--ckpt"), Some("rwkv7b-mix665k"));

    let mut job = sample_job(Path::new("/data"));
    job.convert = false;
    let plan = plan_eval_run(&job, &devices, &cfg).expect("plan");
    assert!(plan.run.finalize.is_none());
}

#[test]
fn plan_rejects_bare_model_filename() {
    let cfg = ToolConfig::default();
    let devices = DeviceList::default();
    let mut job = sample_job(Path::new("/data"));
    job.model_path = PathBuf::from("model.pth");
    let err = plan_eval_run(&job, &devices, &cfg).unwrap_err();
    assert!(matches!(err, PlanError::ExpName(_)));
}

#[test]
fn command_render_prefixes_device_binding() {
    let cfg = ToolConfig::default();
    let devices = DeviceList::parse("2").expect("parse");
    let plan = plan_eval_run(&sample_job(Path::new("/data")), &devices, &cfg).expect("plan");
    let rendered = plan.run.chunks[0].command.render();
    assert!(rendered.starts_with("CUDA_VISIBLE_DEVICES=\"2\" python evaluate.py "));
}

#[test]
fn train_command_carries_strategy_flags() {
    let cfg = ToolConfig::default();
    let opts = TrainOptions {
        load_model: Some(PathBuf::from("/models/rwkv-base.pth")),
        proj_dir: PathBuf::from("out/visual-rwkv"),
        data_file: PathBuf::from("data/mix665k.json"),
        data_type: "json".to_string(),
        image_folder: PathBuf::from("data/images"),
        vision_tower: "openai/clip-vit-base-patch32".to_string(),
        image_position: "first".to_string(),
        vocab_size: 65536,
        ctx_len: 1024,
        n_layer: 24,
        n_embd: 2048,
        grid_size: 8,
        epoch_steps: 1000,
        epoch_count: 3,
        epoch_begin: 0,
        epoch_save: 1,
        micro_bsz: 8,
        accumulate_grad_batches: 2,
        lr_init: 0.001,
        lr_final: 0.0001,
        warmup_steps: -1,
        beta1: 0.9,
        beta2: 0.99,
        adam_eps: 0.00000001,
        accelerator: "gpu".to_string(),
        devices: 8,
        precision: "bf16".to_string(),
        strategy: "deepspeed_stage_2".to_string(),
        grad_cp: true,
        freeze_rwkv: true,
        freeze_proj: false,
    };
    let cmd = train_command(&opts, &cfg);

    assert_eq!(cmd.program, PathBuf::from("python"));
    assert_eq!(cmd.args[0], "train.py");
    let args = &cmd.args;
    assert_eq!(
        flag_value(args, "--load_model"),
        Some("/models/rwkv-base.pth")
    );
    assert_eq!(flag_value(args, "--data_file"), Some("data/mix665k.json"));
    assert_eq!(flag_value(args, "--strategy"), Some("deepspeed_stage_2"));
    assert_eq!(flag_value(args, "--devices"), Some("8"));
    assert_eq!(flag_value(args, "--micro_bsz"), Some("8"));
    assert_eq!(flag_value(args, "--accumulate_grad_batches"), Some("2"));
    assert_eq!(flag_value(args, "--lr_init"), Some("0.001"));
    assert_eq!(flag_value(args, "--warmup_steps"), Some("-1"));
    assert_eq!(flag_value(args, "--grad_cp"), Some("1"));
    assert_eq!(flag_value(args, "--freeze_rwkv"), Some("1"));
    assert_eq!(flag_value(args, "--freeze_proj"), Some("0"));
    assert_eq!(flag_value(args, "--epoch_save"), Some("1"));
    assert!(cmd.envs.is_empty());
}
