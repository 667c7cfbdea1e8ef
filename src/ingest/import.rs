use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::database::models::NewMedia;
use crate::error::{LibraryError, Result};
use crate::library::Library;
use crate::media::mimetype::{detect_mimetype, image_dimensions, is_image};
use crate::utils::now_millis;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "reason")]
pub enum SkipReason {
    NotAFile,
    AlreadyStored { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum ImportOutcome {
    Imported { id: String },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

/// Progress report for one input path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportEvent {
    pub path: PathBuf,
    pub outcome: ImportOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Cancellation flag plus an optional progress channel for a running import.
#[derive(Clone, Default)]
pub struct ImportControl {
    cancelled: Arc<AtomicBool>,
    events: Option<Sender<ImportEvent>>,
}

impl ImportControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Sender<ImportEvent>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            events: Some(events),
        }
    }

    /// Stops scheduling further files. A file already in flight completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn emit(&self, path: &Path, outcome: ImportOutcome) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(ImportEvent {
                path: path.to_path_buf(),
                outcome,
            });
        }
    }
}

impl Library {
    pub fn import(&mut self, paths: &[PathBuf]) -> ImportSummary {
        self.import_with(paths, &ImportControl::new())
    }

    /// Imports files one at a time. A failing file is reported and counted,
    /// the rest of the batch carries on.
    pub fn import_with(&mut self, paths: &[PathBuf], control: &ImportControl) -> ImportSummary {
        let mut summary = ImportSummary::default();

        for path in paths {
            if control.is_cancelled() {
                info!("Import cancelled with {} file(s) left", paths.len() - summary.total());
                break;
            }

            let outcome = match self.import_file(path) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Failed to import {:?}: {}", path, e);
                    ImportOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            match &outcome {
                ImportOutcome::Imported { .. } => summary.imported += 1,
                ImportOutcome::Skipped { .. } => summary.skipped += 1,
                ImportOutcome::Failed { .. } => summary.failed += 1,
            }
            control.emit(path, outcome);
        }

        info!(
            "Import finished: {} imported, {} skipped, {} failed",
            summary.imported, summary.skipped, summary.failed
        );
        summary
    }

    // A copy that succeeds followed by a failed insert leaves the blob
    // behind; re-importing the same bytes reuses it.
    fn import_file(&mut self, path: &Path) -> Result<ImportOutcome> {
        let meta =
            fs::metadata(path).map_err(|e| LibraryError::io("failed to stat import path", path, e))?;
        if !meta.is_file() {
            debug!("Skipping non-file {:?}", path);
            return Ok(ImportOutcome::Skipped {
                reason: SkipReason::NotAFile,
            });
        }

        let id = self.content.hash_file(path)?;
        let source_path = path.to_string_lossy().into_owned();

        if let Some(new_source) = self.store.append_source_if_stored(&id, &source_path)? {
            if new_source {
                debug!("Recorded new source {:?} for {}", path, id);
            }
            return Ok(ImportOutcome::Skipped {
                reason: SkipReason::AlreadyStored { id },
            });
        }

        let blob = self.content.store(path, &id)?;
        let mime = detect_mimetype(&blob.absolute_path);
        let (width, height) = if is_image(mime.as_deref()) {
            image_dimensions(&blob.absolute_path).unzip()
        } else {
            (None, None)
        };
        let thumb_path = self
            .thumbnails
            .generate(&id, &blob.absolute_path, mime.as_deref())?;

        let media = NewMedia {
            id: id.clone(),
            original_filename: file_name(path),
            stored_path: blob.relative_path,
            mime,
            size: meta.len(),
            width,
            height,
            imported_at: now_millis(),
            title: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .filter(|s| !s.is_empty()),
            thumb_path,
            source_path,
        };
        if !self.store.insert_media(&media)? {
            return Ok(ImportOutcome::Skipped {
                reason: SkipReason::AlreadyStored { id },
            });
        }

        info!("Imported {:?} as {}", path, id);
        Ok(ImportOutcome::Imported { id })
    }
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.imported + self.skipped + self.failed
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::ORIGINALS_DIR;
    use crate::library::Capabilities;
    use crate::testing::{fake_capabilities, library_in, write_file, FailingEncoder};
    use crate::ingest::hasher::Sha256Hasher;
    use crossbeam::channel::unbounded;
    use tempfile::tempdir;
    use walkdir::WalkDir;

    fn blob_count(library: &Library) -> usize {
        WalkDir::new(library.root().join(ORIGINALS_DIR))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[test]
    fn test_identical_bytes_dedup_to_one_media() {
        let dir = tempdir().unwrap();
        let (caps, _) = fake_capabilities();
        let mut library = library_in(dir.path(), caps);
        let a = write_file(dir.path(), "a.bin", b"same bytes");
        let b = write_file(dir.path(), "b.bin", b"same bytes");

        let summary = library.import(&[a.clone(), b.clone()]);
        assert_eq!(
            summary,
            ImportSummary {
                imported: 1,
                skipped: 1,
                failed: 0
            }
        );

        let media = library.metadata().list_media(10, 0).unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].title.as_deref(), Some("a"));
        assert_eq!(media[0].original_filename, "a.bin");
        let details = library.metadata().media_details(&media[0].id).unwrap().unwrap();
        assert_eq!(details.sources.len(), 2);
        assert_eq!(details.size, 10);

        let again = library.import(&[a, b]);
        assert_eq!(again.skipped, 2);
        let details = library.metadata().media_details(&media[0].id).unwrap().unwrap();
        assert_eq!(details.sources.len(), 2);
        assert_eq!(blob_count(&library), 1);
    }

    #[test]
    fn test_three_paths_make_one_duplicate_group() {
        let dir = tempdir().unwrap();
        let (caps, _) = fake_capabilities();
        let mut library = library_in(dir.path(), caps);
        let paths: Vec<_> = ["x.dat", "y.dat", "z.dat"]
            .iter()
            .map(|name| write_file(dir.path(), name, b"triplicate"))
            .collect();

        library.import(&paths);
        let groups = library.metadata().list_duplicate_groups(10, 0).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].source_count, 3);
    }

    #[test]
    fn test_failures_are_isolated_per_file() {
        let dir = tempdir().unwrap();
        let (caps, _) = fake_capabilities();
        let mut library = library_in(dir.path(), caps);
        let (tx, rx) = unbounded();
        let control = ImportControl::with_events(tx);

        let good = write_file(dir.path(), "good.dat", b"fine");
        let missing = dir.path().join("missing.dat");
        let folder = dir.path().join("folder");
        fs::create_dir(&folder).unwrap();

        let summary = library.import_with(&[missing.clone(), folder.clone(), good.clone()], &control);
        assert_eq!(
            summary,
            ImportSummary {
                imported: 1,
                skipped: 1,
                failed: 1
            }
        );
        drop(control);

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].path, missing);
        assert!(matches!(events[0].outcome, ImportOutcome::Failed { .. }));
        assert_eq!(
            events[1].outcome,
            ImportOutcome::Skipped {
                reason: SkipReason::NotAFile
            }
        );
        assert!(matches!(events[2].outcome, ImportOutcome::Imported { .. }));
    }

    #[test]
    fn test_cancel_stops_scheduling() {
        let dir = tempdir().unwrap();
        let (caps, _) = fake_capabilities();
        let mut library = library_in(dir.path(), caps);
        let path = write_file(dir.path(), "a.dat", b"a");

        let control = ImportControl::new();
        control.cancel();
        let summary = library.import_with(&[path], &control);
        assert_eq!(summary.total(), 0);
        assert!(library.metadata().list_media(10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_thumbnail_failure_fails_only_media_files() {
        let dir = tempdir().unwrap();
        let mut library = library_in(
            dir.path(),
            Capabilities {
                hasher: Box::new(Sha256Hasher),
                encoder: Box::new(FailingEncoder),
            },
        );
        let png = dir.path().join("pic.png");
        image::RgbImage::new(4, 4).save(&png).unwrap();
        let other = write_file(dir.path(), "notes.dat", b"\x00\x01 opaque");

        let summary = library.import(&[png, other]);
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.failed, 1);

        let media = library.metadata().list_media(10, 0).unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].original_filename, "notes.dat");
        assert!(!media[0].has_thumbnail);
    }

    #[test]
    fn test_images_get_dimensions_and_thumbnail() {
        let dir = tempdir().unwrap();
        let (caps, calls) = fake_capabilities();
        let mut library = library_in(dir.path(), caps);
        let png = dir.path().join("Wide.PNG");
        image::RgbImage::new(30, 20).save_with_format(&png, image::ImageFormat::Png).unwrap();

        library.import(&[png]);
        let media = library.metadata().list_media(10, 0).unwrap();
        let details = library.metadata().media_details(&media[0].id).unwrap().unwrap();
        assert_eq!(details.summary.mime.as_deref(), Some("image/png"));
        assert_eq!((details.width, details.height), (Some(30), Some(20)));
        assert!(details.summary.has_thumbnail);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let location = library.metadata().stored_location(&media[0].id).unwrap().unwrap();
        assert!(location.stored_path.ends_with(".png"));
        assert!(library.root().join(&location.stored_path).is_file());
    }
}
