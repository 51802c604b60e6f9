use std::path::{Path, PathBuf};

use crate::{error::Result, sandbox::path_key};

/// A discovered file inside the sandbox.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the walked root.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

impl DiscoveredFile {
    /// The `/`-separated key used by both stores.
    pub fn key(&self) -> String {
        path_key(&self.relative_path)
    }
}

/// Recursively walk a directory and discover every regular file.
///
/// Skips hidden files/directories (names starting with `.`). Results are
/// sorted by relative path.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let resolved = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            // Directory links are not followed (cycle prevention).
            if resolved.is_file() {
                results.push(make_discovered(root, &entry.path(), &resolved));
            }
        } else if file_type.is_file() {
            let abs = entry.path().canonicalize()?;
            results.push(make_discovered(root, &entry.path(), &abs));
        }
    }

    Ok(())
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> DiscoveredFile {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
    }
}
