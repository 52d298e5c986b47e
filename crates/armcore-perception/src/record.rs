//! On-disk calibration record.
//!
//! A record is a single JSON document.  Writes go to `<path>.tmp` first and
//! are renamed into place, so a crash mid-write never leaves a truncated
//! record behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use armcore_types::CalibrationError;

use crate::calibration::CalibrationTransform;

/// Format version written into every record.
pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalibrationRecord {
    version: u32,
    transform: CalibrationTransform,
}

fn persistence(path: &Path, what: &str, e: impl std::fmt::Display) -> CalibrationError {
    CalibrationError::Persistence(format!("{what} {}: {e}", path.display()))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Atomically write `transform` to `path`, creating parent directories.
pub fn save(path: &Path, transform: &CalibrationTransform) -> Result<(), CalibrationError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persistence(parent, "cannot create", e))?;
    }

    let record = CalibrationRecord {
        version: RECORD_VERSION,
        transform: transform.clone(),
    };
    let json = serde_json::to_vec_pretty(&record).map_err(|e| persistence(path, "cannot encode", e))?;

    let tmp = tmp_path(path);
    let mut file = fs::File::create(&tmp).map_err(|e| persistence(&tmp, "cannot create", e))?;
    file.write_all(&json)
        .and_then(|()| file.sync_all())
        .map_err(|e| persistence(&tmp, "cannot write", e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        persistence(path, "cannot replace", e)
    })?;
    debug!(path = %path.display(), "calibration record written");
    Ok(())
}

/// Read a record.  Returns `Ok(None)` when `path` does not exist.
pub fn load(path: &Path) -> Result<Option<CalibrationTransform>, CalibrationError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(persistence(path, "cannot read", e)),
    };
    let record: CalibrationRecord =
        serde_json::from_slice(&bytes).map_err(|e| persistence(path, "cannot parse", e))?;
    if record.version != RECORD_VERSION {
        return Err(CalibrationError::Persistence(format!(
            "{}: unsupported record version {}",
            path.display(),
            record.version
        )));
    }
    Ok(Some(record.transform))
}
