use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Expands import arguments into a flat file list.
///
/// Directories are walked recursively, skipping hidden entries. Everything
/// else is passed through untouched so the import can report on it.
pub fn expand_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            scan_directory(input, &mut files);
        } else {
            files.push(input.clone());
        }
    }
    files
}

fn scan_directory(root: &Path, out: &mut Vec<PathBuf>) {
    let walker = WalkDir::new(root).sort_by_file_name().into_iter();

    for entry in walker.filter_entry(|e| e.depth() == 0 || !is_hidden(e)) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => out.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable entry under {:?}: {}", root, e),
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
