//! Crash-safe file replacement shared by the metadata store and the vector index.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` via a synced temp file and a rename.
///
/// A crash at any point leaves either the old file or the new one, never a
/// truncated mix.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| IndexError::storage(parent, e))?;
    }

    let tmp = tmp_path_for(path);
    let mut file = File::create(&tmp).map_err(|e| IndexError::storage(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| IndexError::storage(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| IndexError::storage(path, e))?;
    Ok(())
}
