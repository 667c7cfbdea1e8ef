use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{LibraryError, Result};
use crate::ingest::hasher::{calculate_hash, ContentHasher, Sha256Hasher};

pub const ORIGINALS_DIR: &str = "originals";

/// A blob that now lives under the library root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Relative to the library root, always `/`-separated.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    /// False when the destination was already present and the copy was skipped.
    pub copied: bool,
}

/// Content-addressed blob store rooted at a library directory.
pub struct ContentStore {
    root: PathBuf,
    hasher: Box<dyn ContentHasher>,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_hasher(root, Box::new(Sha256Hasher))
    }

    pub fn with_hasher(root: impl Into<PathBuf>, hasher: Box<dyn ContentHasher>) -> Self {
        Self {
            root: root.into(),
            hasher,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hash_file(&self, path: &Path) -> Result<String> {
        calculate_hash(self.hasher.as_ref(), path)
    }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// `originals/<hh>/<hh>/<hash><ext>`, with the source extension lowercased.
    pub fn sharded_relative_path(hash: &str, source: &Path) -> String {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        format!(
            "{}/{}/{}/{}{}",
            ORIGINALS_DIR,
            &hash[0..2],
            &hash[2..4],
            hash,
            ext
        )
    }

    /// Copies `source` into its sharded slot unless the slot is already filled.
    ///
    /// The copy goes through a `.partial` sibling that is renamed into place,
    /// so an existing destination is always a complete blob.
    pub fn store(&self, source: &Path, hash: &str) -> Result<StoredBlob> {
        let relative_path = Self::sharded_relative_path(hash, source);
        let absolute_path = self.absolute(&relative_path);

        if absolute_path.is_file() {
            debug!("Blob already present at {:?}, skipping copy", absolute_path);
            return Ok(StoredBlob {
                relative_path,
                absolute_path,
                copied: false,
            });
        }

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LibraryError::io("failed to create shard directory", parent, e))?;
        }

        let partial = partial_path(&absolute_path);
        fs::copy(source, &partial).map_err(|e| {
            let _ = fs::remove_file(&partial);
            LibraryError::io("failed to copy file into library", source, e)
        })?;
        fs::rename(&partial, &absolute_path).map_err(|e| {
            let _ = fs::remove_file(&partial);
            LibraryError::io("failed to finalize stored blob", &absolute_path, e)
        })?;

        debug!("Stored {:?} as {}", source, relative_path);
        Ok(StoredBlob {
            relative_path,
            absolute_path,
            copied: true,
        })
    }
}

/// Sibling a file is written to before being renamed into place.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut partial = path.as_os_str().to_os_string();
    partial.push(".partial");
    PathBuf::from(partial)
}
