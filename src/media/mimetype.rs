use std::path::Path;

use tracing::debug;

/// Sniffs the mime type from file content. `None` when unrecognised or unreadable.
pub fn detect_mimetype(path: &Path) -> Option<String> {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => Some(kind.mime_type().to_string()),
        Ok(None) => None,
        Err(e) => {
            debug!("Mimetype detection failed for {:?}: {}", path, e);
            None
        }
    }
}

pub fn is_image(mime: Option<&str>) -> bool {
    mime.is_some_and(|m| m.starts_with("image/"))
}

pub fn is_video(mime: Option<&str>) -> bool {
    mime.is_some_and(|m| m.starts_with("video/"))
}

/// Pixel dimensions read from the image header, without decoding the body.
pub fn image_dimensions(path: &Path) -> Option<(u32, u32)> {
    image::image_dimensions(path).ok()
}
