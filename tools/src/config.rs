use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_CONFIG_NAME: &str = "vlmrun-tools.toml";
const DEFAULT_SPLIT: &str = "llava_vqav2_mscoco_test-dev2015";

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub python_bin: PathBuf,
    pub eval_script: PathBuf,
    pub convert_script: PathBuf,
    pub train_script: PathBuf,
    pub default_split: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            python_bin: PathBuf::from("python"),
            eval_script: PathBuf::from("evaluate.py"),
            convert_script: PathBuf::from("eval/convert_vqav2_for_submission.py"),
            train_script: PathBuf::from("train.py"),
            default_split: DEFAULT_SPLIT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ToolConfigFile {
    python_bin: Option<String>,
    eval_script: Option<String>,
    convert_script: Option<String>,
    train_script: Option<String>,
    eval: Option<EvalSection>,
}

#[derive(Debug, Deserialize, Default)]
struct EvalSection {
    split: Option<String>,
}

impl ToolConfig {
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("VLMRUN_TOOLS_CONFIG") {
            let cfg = Self::from_path(Path::new(&path)).unwrap_or_default();
            cfg.warn_if_invalid();
            return cfg;
        }
        let cfg = Self::from_path(Path::new(DEFAULT_CONFIG_NAME)).unwrap_or_default();
        cfg.warn_if_invalid();
        cfg
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(path).ok()?;
        let file: ToolConfigFile = toml::from_str(&raw).ok()?;
        Some(Self::from_file(file))
    }

    fn from_file(file: ToolConfigFile) -> Self {
        ToolConfig {
            python_bin: file
                .python_bin
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| PathBuf::from("python")),
            eval_script: file
                .eval_script
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| PathBuf::from("evaluate.py")),
            convert_script: file
                .convert_script
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| PathBuf::from("eval/convert_vqav2_for_submission.py")),
            train_script: file
                .train_script
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| PathBuf::from("train.py")),
            default_split: file
                .eval
                .and_then(|e| e.split)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SPLIT.to_string()),
        }
    }

    fn warn_if_invalid(&self) {
        if self.python_bin.as_os_str().is_empty() {
            eprintln!("tools config: python_bin is empty; jobs may fail to launch");
        }
        if self.eval_script.as_os_str().is_empty() {
            eprintln!("tools config: eval_script is empty; vqav2_eval will fail to run");
        }
        if self.train_script.as_os_str().is_empty() {
            eprintln!("tools config: train_script is empty; train_launch will fail to run");
        }
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = input[i + 2..].find('}') {
                let key = &input[i + 2..i + 2 + end];
                if let Ok(val) = std::env::var(key) {
                    out.push_str(&val);
                } else {
                    out.push_str(&format!("${{{}}}", key));
                }
                i += end + 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}
