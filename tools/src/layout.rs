use std::path::{Path, PathBuf};

/// Answer-file layout for one evaluation run, rooted at
/// `<eval_dir>/eval/vqav2/answers/<split>/<exp_name>`.
#[derive(Debug, Clone)]
pub struct EvalLayout {
    pub eval_root: PathBuf,
    pub answers_dir: PathBuf,
    pub split: String,
}

impl EvalLayout {
    pub fn new(eval_dir: &Path, split: &str, exp_name: &str) -> Self {
        let eval_root = eval_dir.join("eval").join("vqav2");
        let answers_dir = eval_root.join("answers").join(split).join(exp_name);
        Self {
            eval_root,
            answers_dir,
            split: split.to_string(),
        }
    }

    /// Question file consumed by the inference job.
    pub fn question_file(&self) -> PathBuf {
        self.eval_root.join(format!("{}.jsonl", self.split))
    }

    pub fn image_folder(&self) -> PathBuf {
        self.eval_root.join("test2015")
    }

    /// Per-chunk answers file, `<num_chunks>_<chunk_index>.jsonl`.
    pub fn chunk_file(&self, num_chunks: usize, chunk_index: usize) -> PathBuf {
        self.answers_dir
            .join(format!("{num_chunks}_{chunk_index}.jsonl"))
    }

    pub fn merged_file(&self) -> PathBuf {
        self.answers_dir.join("merge.jsonl")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.answers_dir.join("merge_manifest.json")
    }
}

/// Experiment name for a model checkpoint: the name of the directory the
/// checkpoint sits in. `None` when the path has no usable parent.
pub fn exp_name(model_path: &Path) -> Option<String> {
    model_path
        .parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
}
