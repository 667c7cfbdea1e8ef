use std::fs;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageDecoder, ImageReader};
use tracing::{debug, info};

use crate::error::{LibraryError, Result};
use crate::ingest::store::partial_path;
use crate::media::ffmpeg;
use crate::media::mimetype::{is_image, is_video};

pub const THUMBS_DIR: &str = "thumbs";
pub const THUMBNAIL_MAX_EDGE: u32 = 320;
pub const THUMBNAIL_QUALITY: u8 = 80;

/// Decode/encode capability behind thumbnail generation.
///
/// Both methods return the encoded JPEG preview for the file at `source`.
pub trait PreviewEncoder: Send + Sync {
    fn encode_image(&self, source: &Path) -> Result<Vec<u8>>;
    fn encode_video_frame(&self, source: &Path) -> Result<Vec<u8>>;
}

/// `image` for stills, `ffmpeg` for the video frame, JPEG out.
#[derive(Debug, Clone)]
pub struct JpegPreviewEncoder {
    pub max_edge: u32,
    pub quality: u8,
}

impl Default for JpegPreviewEncoder {
    fn default() -> Self {
        Self {
            max_edge: THUMBNAIL_MAX_EDGE,
            quality: THUMBNAIL_QUALITY,
        }
    }
}

impl JpegPreviewEncoder {
    fn encode_jpeg(&self, source: &Path, image: &DynamicImage) -> Result<Vec<u8>> {
        // Fits inside the box, aspect ratio preserved.
        let resized = image.thumbnail(self.max_edge, self.max_edge);
        let rgb = resized.to_rgb8();

        let mut buffer = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| LibraryError::thumbnail(source, e))?;
        Ok(buffer)
    }
}

impl PreviewEncoder for JpegPreviewEncoder {
    fn encode_image(&self, source: &Path) -> Result<Vec<u8>> {
        let reader = ImageReader::open(source)
            .map_err(|e| LibraryError::io("failed to open image", source, e))?
            .with_guessed_format()
            .map_err(|e| LibraryError::io("failed to sniff image format", source, e))?;
        let mut decoder = reader
            .into_decoder()
            .map_err(|e| LibraryError::thumbnail(source, e))?;
        let orientation = decoder
            .orientation()
            .map_err(|e| LibraryError::thumbnail(source, e))?;
        let mut image =
            DynamicImage::from_decoder(decoder).map_err(|e| LibraryError::thumbnail(source, e))?;
        image.apply_orientation(orientation);

        self.encode_jpeg(source, &image)
    }

    fn encode_video_frame(&self, source: &Path) -> Result<Vec<u8>> {
        let frame = ffmpeg::extract_first_frame(source)?;
        let image =
            image::load_from_memory(&frame).map_err(|e| LibraryError::thumbnail(source, e))?;
        self.encode_jpeg(source, &image)
    }
}

/// Writes `thumbs/<id>.jpg` previews under a library root.
pub struct ThumbnailGenerator {
    root: PathBuf,
    encoder: Box<dyn PreviewEncoder>,
}

impl ThumbnailGenerator {
    pub fn new(root: impl Into<PathBuf>, encoder: Box<dyn PreviewEncoder>) -> Self {
        Self {
            root: root.into(),
            encoder,
        }
    }

    pub fn relative_path(id: &str) -> String {
        format!("{}/{}.jpg", THUMBS_DIR, id)
    }

    /// Returns the relative thumbnail path, or `None` for mimes that get no preview.
    ///
    /// An existing thumbnail is reused without touching the encoder. Encoder
    /// failures for image and video mimes are returned to the caller.
    pub fn generate(&self, id: &str, stored_path: &Path, mime: Option<&str>) -> Result<Option<String>> {
        let relative = Self::relative_path(id);
        let absolute = self.root.join(&relative);

        if absolute.is_file() {
            debug!("Thumbnail for {} already exists", id);
            return Ok(Some(relative));
        }

        let bytes = if is_image(mime) {
            self.encoder.encode_image(stored_path)?
        } else if is_video(mime) {
            self.encoder.encode_video_frame(stored_path)?
        } else {
            return Ok(None);
        };

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LibraryError::io("failed to create thumbnail directory", parent, e))?;
        }
        // Only complete previews may appear under the final name.
        let partial = partial_path(&absolute);
        fs::write(&partial, &bytes)
            .and_then(|_| fs::rename(&partial, &absolute))
            .map_err(|e| {
                let _ = fs::remove_file(&partial);
                LibraryError::io("failed to write thumbnail", &absolute, e)
            })?;

        info!("Generated thumbnail for {} ({} bytes)", id, bytes.len());
        Ok(Some(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingEncoder, FailingEncoder};
    use tempfile::tempdir;

    const ID: &str = "00aa00aa00aa00aa00aa00aa00aa00aa00aa00aa00aa00aa00aa00aa00aa00aa";

    #[test]
    fn test_generate_is_idempotent() {
        let lib = tempdir().unwrap();
        let encoder = CountingEncoder::default();
        let calls = encoder.calls.clone();
        let generator = ThumbnailGenerator::new(lib.path(), Box::new(encoder));
        let source = lib.path().join("whatever.png");

        let first = generator.generate(ID, &source, Some("image/png")).unwrap();
        let second = generator.generate(ID, &source, Some("image/png")).unwrap();

        assert_eq!(first.as_deref(), Some(format!("thumbs/{}.jpg", ID).as_str()));
        assert_eq!(first, second);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(lib.path().join(first.unwrap()).is_file());
    }

    #[test]
    fn test_non_media_mime_gets_no_thumbnail() {
        let lib = tempdir().unwrap();
        let encoder = CountingEncoder::default();
        let calls = encoder.calls.clone();
        let generator = ThumbnailGenerator::new(lib.path(), Box::new(encoder));

        let out = generator
            .generate(ID, &lib.path().join("doc.pdf"), Some("application/pdf"))
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(generator.generate(ID, Path::new("x"), None).unwrap(), None);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_encoder_failure_propagates_for_video() {
        let lib = tempdir().unwrap();
        let generator = ThumbnailGenerator::new(lib.path(), Box::new(FailingEncoder));
        let err = generator
            .generate(ID, &lib.path().join("clip.mp4"), Some("video/mp4"))
            .unwrap_err();
        assert!(matches!(err, LibraryError::Thumbnail { .. }));
        assert!(!lib.path().join(ThumbnailGenerator::relative_path(ID)).exists());
    }

    #[test]
    fn test_jpeg_encoder_fits_bounding_box() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("wide.png");
        image::RgbImage::from_pixel(800, 400, image::Rgb([200, 30, 30]))
            .save(&source)
            .unwrap();

        let bytes = JpegPreviewEncoder::default().encode_image(&source).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 160));
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_leftover_partial_is_not_a_thumbnail() {
        let lib = tempdir().unwrap();
        let encoder = CountingEncoder::default();
        let calls = encoder.calls.clone();
        let generator = ThumbnailGenerator::new(lib.path(), Box::new(encoder));
        let target = lib.path().join(ThumbnailGenerator::relative_path(ID));
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(partial_path(&target), b"torn").unwrap();

        generator
            .generate(ID, &lib.path().join("x.png"), Some("image/png"))
            .unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(fs::read(&target).unwrap(), b"fake-jpeg");
        assert!(!partial_path(&target).exists());
    }

    /// APP1 segment holding a little-endian TIFF block with one Orientation entry.
    fn exif_orientation_segment(orientation: u8) -> Vec<u8> {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(b"II\x2a\x00\x08\x00\x00\x00");
        payload.extend_from_slice(&[0x01, 0x00]);
        payload.extend_from_slice(&[0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&[orientation, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let length = (payload.len() + 2) as u16;
        let mut segment = vec![0xFF, 0xE1];
        segment.extend_from_slice(&length.to_be_bytes());
        segment.extend_from_slice(&payload);
        segment
    }

    #[test]
    fn test_jpeg_encoder_applies_exif_orientation() {
        let dir = tempdir().unwrap();
        let mut plain = Vec::new();
        JpegEncoder::new_with_quality(&mut plain, 90)
            .encode_image(&image::RgbImage::from_pixel(640, 320, image::Rgb([10, 120, 200])))
            .unwrap();
        assert_eq!(&plain[..2], &[0xFF, 0xD8]);

        // Rotate 90 degrees clockwise on display.
        let mut rotated = plain[..2].to_vec();
        rotated.extend(exif_orientation_segment(6));
        rotated.extend_from_slice(&plain[2..]);
        let source = dir.path().join("portrait.jpg");
        fs::write(&source, &rotated).unwrap();

        let bytes = JpegPreviewEncoder::default().encode_image(&source).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (160, 320));
    }

    #[test]
    fn test_jpeg_encoder_rejects_garbage() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("broken.png");
        fs::write(&source, b"\x89PNG\r\n\x1a\nnot really").unwrap();
        assert!(JpegPreviewEncoder::default().encode_image(&source).is_err());
    }
}
