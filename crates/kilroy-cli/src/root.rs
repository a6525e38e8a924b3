use kilroy_core::paths;
use std::path::{Path, PathBuf};

/// Resolve the kilroy workspace root.
///
/// Priority:
/// 1. `--root` flag / `KILROY_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `start` looking for `kilroy.yaml`
/// 3. Fall back to `start`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_root(&cwd)
}

fn find_root(start: &Path) -> PathBuf {
    let mut dir = start;
    loop {
        if dir.join(paths::CONFIG_FILE).is_file() {
            return dir.to_path_buf();
        }
        match dir.parent() {
            Some(p) => dir = p,
            None => break,
        }
    }
    start.to_path_buf()
}
