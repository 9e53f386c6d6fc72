use std::io::{self, BufRead};

use serde::{Deserialize, Serialize};

/// One generated answer, as written per line by the inference job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Line counts from scanning an answers file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnswerScan {
    pub parsed: usize,
    pub malformed: usize,
}

impl AnswerScan {
    pub fn lines(&self) -> usize {
        self.parsed + self.malformed
    }
}

/// Count how many lines of a newline-delimited answers stream parse as
/// [`AnswerRecord`]. Blank lines are ignored; the stream is never altered.
pub fn scan_answers<R: BufRead>(reader: R) -> io::Result<AnswerScan> {
    let mut scan = AnswerScan::default();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AnswerRecord>(&line) {
            Ok(_) => scan.parsed += 1,
            Err(_) => scan.malformed += 1,
        }
    }
    Ok(scan)
}
