use crate::error::{KilroyError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "kilroy.yaml";
pub const DEFAULT_CATALOG: &str = "default_config.xml";
pub const PROTOCOLS_DIR: &str = "protocols";
pub const XML_EXTENSION: &str = "xml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Strip a trailing `.xml` from a user-supplied file name, yielding the
/// protocol or hyperprotocol name stored inside the document.
pub fn document_name(file_name: &str) -> Result<String> {
    let trimmed = file_name.trim();
    let name = trimmed
        .strip_suffix(".xml")
        .unwrap_or(trimmed)
        .to_string();
    validate_name(&name)?;
    Ok(name)
}

/// `<dir>/<name>.xml`, where `name` may be given with or without the extension.
pub fn document_path(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let name = document_name(file_name)?;
    Ok(dir.join(format!("{name}.{XML_EXTENSION}")))
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
        return Err(KilroyError::InvalidName(name.to_string()));
    }
    Ok(())
}
