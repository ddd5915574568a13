//! Moving documents aside into `.backup/`.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use super::MemoryLayout;
use crate::{Error, Result};

/// Backup filename for `path` at `now`: `<stem>_<YYYYmmdd_HHMMSS>.<ext>`.
#[must_use]
pub fn backup_filename(path: &Path, now: DateTime<Utc>, attempt: u32) -> String {
    let stem = path
        .file_stem()
        .map_or_else(|| "document".into(), |s| s.to_string_lossy().into_owned());
    let ts = now.format("%Y%m%d_%H%M%S");
    let suffix = if attempt == 0 {
        String::new()
    } else {
        format!("_{attempt}")
    };
    match path.extension() {
        Some(ext) => format!("{stem}_{ts}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{ts}{suffix}"),
    }
}

/// Moves a file under the memory root into `.backup/`.
///
/// Never overwrites an existing backup. Returns the backup path.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for paths outside the memory root or
/// files that do not exist, and [`Error::OperationFailed`] if the move fails.
pub fn move_to_backup(layout: &MemoryLayout, path: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    if !layout.contains(path) {
        return Err(Error::InvalidInput(format!(
            "refusing to quarantine {} outside the memory root",
            path.display()
        )));
    }
    let source = layout.resolve(path);
    if !source.is_file() {
        return Err(Error::InvalidInput(format!(
            "nothing to quarantine at {}",
            source.display()
        )));
    }

    let backup_dir = layout.backup_dir();
    fs::create_dir_all(&backup_dir).map_err(|e| Error::operation("create_backup_dir", e))?;

    let mut attempt = 0;
    let target = loop {
        let candidate = backup_dir.join(backup_filename(&source, now, attempt));
        if !candidate.exists() {
            break candidate;
        }
        attempt += 1;
    };

    fs::rename(&source, &target).map_err(|e| {
        Error::operation(
            "quarantine_document",
            format!("{} -> {}: {e}", source.display(), target.display()),
        )
    })?;

    tracing::warn!(
        source = %source.display(),
        backup = %target.display(),
        "Quarantined document"
    );
    metrics::counter!("pms_files_quarantined_total").increment(1);
    Ok(target)
}
