//! Shared fixtures for unit tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::database::models::NewMedia;
use crate::error::{LibraryError, Result};
use crate::ingest::hasher::Sha256Hasher;
use crate::library::Capabilities;
use crate::media::thumbnail::PreviewEncoder;

/// A well-formed media id derived from `n`.
pub fn media_id(n: u32) -> String {
    format!("{:064x}", n)
}

pub fn new_media(n: u32, source: &str) -> NewMedia {
    let id = media_id(n);
    let original_filename = Path::new(source)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string());
    NewMedia {
        stored_path: format!("originals/{}/{}/{}.png", &id[0..2], &id[2..4], id),
        id,
        original_filename,
        mime: Some("image/png".to_string()),
        size: 100 + n as u64,
        width: None,
        height: None,
        imported_at: n as i64 * 1000,
        title: Some(format!("media-{}", n)),
        thumb_path: None,
        source_path: source.to_string(),
    }
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

/// Returns fake preview bytes and counts how often it was asked.
#[derive(Default, Clone)]
pub struct CountingEncoder {
    pub calls: Arc<AtomicUsize>,
}

impl PreviewEncoder for CountingEncoder {
    fn encode_image(&self, _source: &Path) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"fake-jpeg".to_vec())
    }

    fn encode_video_frame(&self, _source: &Path) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"fake-frame".to_vec())
    }
}

pub struct FailingEncoder;

impl PreviewEncoder for FailingEncoder {
    fn encode_image(&self, source: &Path) -> Result<Vec<u8>> {
        Err(LibraryError::thumbnail(source, "decoder unavailable"))
    }

    fn encode_video_frame(&self, source: &Path) -> Result<Vec<u8>> {
        Err(LibraryError::thumbnail(source, "ffmpeg unavailable"))
    }
}

/// Real hashing, counting fake previews.
pub fn fake_capabilities() -> (Capabilities, Arc<AtomicUsize>) {
    let encoder = CountingEncoder::default();
    let calls = encoder.calls.clone();
    (
        Capabilities {
            hasher: Box::new(Sha256Hasher),
            encoder: Box::new(encoder),
        },
        calls,
    )
}

/// A freshly created library under `dir/lib`, opened with `capabilities`.
pub fn library_in(dir: &Path, capabilities: Capabilities) -> crate::library::Library {
    let root = dir.join("lib");
    crate::library::Library::create(&root).unwrap();
    crate::library::Library::open_with(&root, capabilities).unwrap()
}
