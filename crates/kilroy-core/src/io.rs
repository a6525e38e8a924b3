use crate::error::Result;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::{Builder, NamedTempFile};

/// Stage `data` in a hidden tempfile next to `path`, flushed to disk.
fn stage(path: &Path, data: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut staged = Builder::new().prefix(".kilroy-").suffix(".tmp").tempfile_in(dir)?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;
    Ok(staged)
}

/// Write `data` to `path` through a staged tempfile and a single rename, so
/// readers see either the old document or the new one, never a torn file.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    stage(path, data)?.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Replace whatever is at `path` with `data`. Returns true if a previous file was overwritten.
pub fn replace_file(path: &Path, data: &[u8]) -> Result<bool> {
    let existed = path.is_file();
    if existed {
        tracing::warn!(path = %path.display(), "file already exists, overwriting");
    }
    atomic_write(path, data)?;
    Ok(existed)
}

/// Create `path` with `data` unless something is already there. Returns
/// whether it was written.
pub fn write_if_missing(path: &Path, data: &[u8]) -> Result<bool> {
    if path.try_exists()? {
        return Ok(false);
    }
    match stage(path, data)?.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}
