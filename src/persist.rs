//! Atomic JSON state files
//!
//! Every state file is written to a sibling temp file and renamed over the
//! target, so a reader sees either the old file or the new one.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{MemoryError, Result};

/// Serialize `value` as pretty JSON and replace `path` with it
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| MemoryError::json(path, e))?;
    write_atomic(path, json.as_bytes())
}

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| MemoryError::io(parent, e))?;
        }
    }

    let tmp = temp_path(path);
    if let Err(e) = std::fs::write(&tmp, contents) {
        let _ = std::fs::remove_file(&tmp);
        return Err(MemoryError::io(&tmp, e));
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(MemoryError::io(path, e));
    }
    Ok(())
}

/// Unique hidden sibling of `path`
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}
