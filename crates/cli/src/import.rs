//! Task import from JSON lines.
//!
//! One task per line:
//!
//! ```text
//! {"id": 17, "embedding": [0.12, -0.4, ...], "size": 5230,
//!  "order_key": {"timestamp": "2025-03-01T09:30:00Z", "seq": 0}}
//! ```
//!
//! Blank lines are skipped. A later line with the same id replaces the
//! earlier one.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use taskweave_core::{Task, TaskId};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Line {line}: {reason}")]
    Line { line: usize, reason: String },
}

/// Parse tasks from a JSON-lines reader.
pub fn parse_jsonl<R: BufRead>(reader: R) -> Result<Vec<Task>, ImportError> {
    let mut tasks: Vec<Task> = Vec::new();
    let mut index: HashMap<TaskId, usize> = HashMap::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ImportError::Line {
            line: n + 1,
            reason: e.to_string(),
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: Task = serde_json::from_str(trimmed).map_err(|e| ImportError::Line {
            line: n + 1,
            reason: e.to_string(),
        })?;
        match index.get(&task.id()) {
            Some(&pos) => {
                tracing::debug!(task = %task.id(), line = n + 1, "Duplicate task id, keeping the later record");
                tasks[pos] = task;
            }
            None => {
                index.insert(task.id(), tasks.len());
                tasks.push(task);
            }
        }
    }

    Ok(tasks)
}

/// Read tasks from a JSON-lines file.
pub fn read_tasks(path: &Path) -> Result<Vec<Task>, ImportError> {
    let file = std::fs::File::open(path).map_err(|e| ImportError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_jsonl(std::io::BufReader::new(file))
}
