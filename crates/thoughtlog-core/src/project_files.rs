use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Read access to the files of a watched project.
pub trait ProjectFiles: Send + Sync {
    /// Relative paths of every tracked file, using `/` separators.
    fn list_files(&self) -> io::Result<Vec<String>>;
    fn read_file(&self, relative: &str) -> io::Result<String>;
}

/// Walks the project tree, skipping hidden entries (the event log directory
/// included) and anything excluded by `.gitignore`.
#[derive(Debug, Clone)]
pub struct WalkedProjectFiles {
    root: PathBuf,
}

impl WalkedProjectFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ProjectFiles for WalkedProjectFiles {
    fn list_files(&self) -> io::Result<Vec<String>> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("project root {} is not a directory", self.root.display()),
            ));
        }

        let walker = ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
        files.sort();
        Ok(files)
    }

    fn read_file(&self, relative: &str) -> io::Result<String> {
        fs::read_to_string(self.root.join(relative))
    }
}

/// 32-bit multiplicative string hash (`h = h * 31 + c`, wrapping).
/// Only used to notice content changes between polls.
pub fn rolling_hash(content: &str) -> u32 {
    content
        .encode_utf16()
        .fold(0u32, |hash, unit| hash.wrapping_mul(31).wrapping_add(u32::from(unit)))
}
