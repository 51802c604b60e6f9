use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Subfolders created inside a fresh sandbox.
pub const LAYOUT: &[&str] = &["documents", "code", "notes", "images", "misc"];

/// The directory whose contents are the only files the concierge sees.
///
/// Every path handed to tools is relative to this root. Absolute paths and
/// `..` components are rejected before the filesystem is touched.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the sandbox root and its standard subfolders if missing.
    pub fn bootstrap(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|_| Error::DataDir(self.root.clone()))?;
        for sub in LAYOUT {
            std::fs::create_dir_all(self.root.join(sub))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a sandbox-relative path to a filesystem path.
    ///
    /// An empty string resolves to the root itself.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        let mut resolved = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::Validation(format!(
                        "path escapes the sandbox: {relative}"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::Validation(format!(
                        "path must be relative to the sandbox: {relative}"
                    )));
                }
            }
        }
        Ok(resolved)
    }

    /// Resolve a path that must exist as a file.
    pub fn resolve_file(&self, relative: &str) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(Error::not_found("file", relative));
        }
        Ok(path)
    }
}

/// Render a relative path as a `/`-separated key.
///
/// Both stores key their records by this string, whatever the host
/// platform's separator is.
pub fn path_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
