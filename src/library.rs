//! Library handle and the session that owns the currently open library.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::models::{MediaDetails, MetaPatch, TagSource};
use crate::database::repo::MetadataStore;
use crate::error::{LibraryError, Result};
use crate::ingest::hasher::{is_content_id, ContentHasher, Sha256Hasher};
use crate::ingest::store::{ContentStore, ORIGINALS_DIR};
use crate::media::mimetype::{is_image, is_video};
use crate::media::thumbnail::{JpegPreviewEncoder, PreviewEncoder, ThumbnailGenerator, THUMBS_DIR};
use crate::server::{MediaResolver, MediaResource, ResolvedFile};
use crate::utils::config::{self, AppState};

pub const DATABASE_FILE: &str = "db.sqlite";
const WRITE_PROBE: &str = ".media-vault-write-test";
const THUMBNAIL_MIME: &str = "image/jpeg";

/// External hash and preview capabilities used during import.
pub struct Capabilities {
    pub hasher: Box<dyn ContentHasher>,
    pub encoder: Box<dyn PreviewEncoder>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            hasher: Box::new(Sha256Hasher),
            encoder: Box::new(JpegPreviewEncoder::default()),
        }
    }
}

/// One open library: its metadata store plus the blob and thumbnail trees.
pub struct Library {
    root: PathBuf,
    pub(crate) store: MetadataStore,
    pub(crate) content: ContentStore,
    pub(crate) thumbnails: ThumbnailGenerator,
}

impl Library {
    /// Lays out a new library, or completes a partial one, at `dir`.
    pub fn create(dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| LibraryError::io("cannot create library directory", dir, e))?;
        assert_writable(dir)?;
        for sub in [ORIGINALS_DIR, THUMBS_DIR] {
            let path = dir.join(sub);
            fs::create_dir_all(&path)
                .map_err(|e| LibraryError::io("cannot create library directory", &path, e))?;
        }
        config::ensure_manifest(dir)?;
        open_store(dir)?;
        info!("Created library at {:?}", dir);
        Ok(())
    }

    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_with(dir, Capabilities::default())
    }

    pub fn open_with(dir: &Path, capabilities: Capabilities) -> Result<Self> {
        if !dir.join(DATABASE_FILE).is_file() {
            return Err(LibraryError::not_found(format!(
                "no library database in {}; create the library first",
                dir.display()
            )));
        }
        let store = open_store(dir)?;
        info!("Opened library at {:?}", dir);
        Ok(Self {
            root: dir.to_path_buf(),
            store,
            content: ContentStore::with_hasher(dir, capabilities.hasher),
            thumbnails: ThumbnailGenerator::new(dir, capabilities.encoder),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.store
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataStore {
        &mut self.store
    }

    /// Image handed to the captioning service. Videos offer their thumbnail.
    pub fn ai_input(&self, media_id: &str) -> Result<AiInput> {
        MetadataStore::require_id(media_id)?;
        let location = self
            .store
            .stored_location(media_id)?
            .ok_or_else(|| LibraryError::not_found(format!("media {}", media_id)))?;

        let mime = location.mime.as_deref();
        let (image_path, image_mime) = if is_video(mime) {
            let thumb = location
                .thumb_path
                .ok_or_else(|| LibraryError::not_found(format!("thumbnail for {}", media_id)))?;
            (self.root.join(thumb), THUMBNAIL_MIME.to_string())
        } else {
            let mime = if is_image(mime) { mime } else { None };
            (
                self.root.join(&location.stored_path),
                mime.unwrap_or(THUMBNAIL_MIME).to_string(),
            )
        };

        if !image_path.is_file() {
            return Err(LibraryError::not_found(format!(
                "stored file {}",
                image_path.display()
            )));
        }
        Ok(AiInput {
            image_path,
            image_mime,
            filename_hint: location.original_filename,
        })
    }

    /// Adds suggested tags (never removes any) and replaces the title only
    /// when the suggestion has a non-blank one.
    pub fn apply_ai_suggestion(
        &mut self,
        media_id: &str,
        suggestion: &AiSuggestion,
    ) -> Result<Option<MediaDetails>> {
        let title = suggestion.title.trim();
        if !title.is_empty() {
            self.store.set_meta(
                media_id,
                &MetaPatch {
                    title: Some(Some(title.to_string())),
                    ..Default::default()
                },
            )?;
        }
        if !suggestion.tags.is_empty() {
            self.store
                .add_tags(media_id, &suggestion.tags, TagSource::Ai, None)?;
        }
        self.store.media_details(media_id)
    }
}

impl MediaResolver for Library {
    fn resolve(&self, resource: MediaResource, id: &str) -> Result<Option<ResolvedFile>> {
        if !is_content_id(id) {
            return Ok(None);
        }
        let Some(location) = self.store.stored_location(id)? else {
            return Ok(None);
        };
        let resolved = match resource {
            MediaResource::Original => Some(ResolvedFile {
                path: self.root.join(&location.stored_path),
                mime: location.mime,
            }),
            MediaResource::Thumbnail => location.thumb_path.map(|thumb| ResolvedFile {
                path: self.root.join(thumb),
                mime: Some(THUMBNAIL_MIME.to_string()),
            }),
        };
        Ok(resolved)
    }
}

fn assert_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(WRITE_PROBE);
    fs::write(&probe, b"probe")
        .and_then(|_| fs::remove_file(&probe))
        .map_err(|e| LibraryError::io("library directory is not writable", dir, e))
}

fn open_store(dir: &Path) -> Result<MetadataStore> {
    MetadataStore::open(&dir.join(DATABASE_FILE)).map_err(|e| match e {
        LibraryError::Database(err) => LibraryError::io(
            "cannot open library database; check the directory is writable and not in use by another process",
            dir,
            io::Error::new(io::ErrorKind::Other, err),
        ),
        other => other,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiInput {
    pub image_path: PathBuf,
    pub image_mime: String,
    pub filename_hint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AiSuggestion {
    pub title: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryStatus {
    pub open: bool,
    pub library_path: Option<PathBuf>,
}

/// Owns at most one open library.
#[derive(Default)]
pub struct Session {
    current: Option<Library>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes whatever is open, then opens `dir`. On failure nothing is open.
    pub fn open(&mut self, dir: &Path) -> Result<&mut Library> {
        self.open_with(dir, Capabilities::default())
    }

    pub fn open_with(&mut self, dir: &Path, capabilities: Capabilities) -> Result<&mut Library> {
        self.close();
        let library = Library::open_with(dir, capabilities)?;
        Ok(self.current.insert(library))
    }

    pub fn close(&mut self) {
        if let Some(library) = self.current.take() {
            info!("Closed library at {:?}", library.root());
        }
    }

    pub fn status(&self) -> LibraryStatus {
        LibraryStatus {
            open: self.current.is_some(),
            library_path: self.current.as_ref().map(|l| l.root().to_path_buf()),
        }
    }

    pub fn library(&self) -> Result<&Library> {
        self.current.as_ref().ok_or(LibraryError::ConfigMissing)
    }

    pub fn library_mut(&mut self) -> Result<&mut Library> {
        self.current.as_mut().ok_or(LibraryError::ConfigMissing)
    }

    /// Reopens the library remembered in `state_file`, closing whatever was
    /// open first. A failed reopen forgets the path and leaves nothing open.
    pub fn restore(&mut self, state_file: &Path) -> Option<&mut Library> {
        self.close();
        let remembered = config::load_state(state_file).last_library?;
        match self.open_with(&remembered, Capabilities::default()) {
            Ok(library) => Some(library),
            Err(e) => {
                warn!("Could not reopen {:?}, forgetting it: {}", remembered, e);
                if let Err(e) = config::save_state(state_file, &AppState::default()) {
                    warn!("Failed to clear state file: {}", e);
                }
                None
            }
        }
    }

    pub fn remember(&self, state_file: &Path) -> Result<()> {
        config::save_state(
            state_file,
            &AppState {
                last_library: self.current.as_ref().map(|l| l.root().to_path_buf()),
            },
        )
    }
}
