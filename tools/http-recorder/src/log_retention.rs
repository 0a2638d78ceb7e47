use crate::errors::RecorderError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const RUN_LOG_EXTENSION: &str = "jsonl";

struct RunLogFile {
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
}

/// Prunes older run logs next to `active` until the directory's run logs fit `budget_bytes`.
///
/// Only `*.jsonl` files are candidates and `active` itself is never removed; anything
/// else in the directory (archives, configs) is neither counted nor touched.
pub fn prune_run_logs(active: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, RecorderError> {
    let Some(dir) = active.parent() else {
        return Ok(Vec::new());
    };
    let io = |e: std::io::Error| RecorderError::Io(e.to_string());

    let active_len = fs::metadata(active).map(|meta| meta.len()).unwrap_or(0);
    let mut older = Vec::new();
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path == active || !is_run_log(&path) {
            continue;
        }
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        older.push(RunLogFile {
            len: meta.len(),
            modified: meta.modified().ok(),
            path,
        });
    }
    older.sort_by_key(|file| file.modified);

    let mut total = active_len + older.iter().map(|file| file.len).sum::<u64>();
    let mut deleted = Vec::new();
    for file in older {
        if total <= budget_bytes {
            break;
        }
        fs::remove_file(&file.path).map_err(io)?;
        total = total.saturating_sub(file.len);
        deleted.push(file.path);
    }
    Ok(deleted)
}

fn is_run_log(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == RUN_LOG_EXTENSION)
}
