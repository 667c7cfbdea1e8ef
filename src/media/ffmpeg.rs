use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{LibraryError, Result};

/// Grabs the first video frame as PNG bytes.
///
/// Equivalent to `ffmpeg -ss 0 -i <input> -frames:v 1 -f image2pipe -vcodec png -`.
pub fn extract_first_frame(input_path: &Path) -> Result<Vec<u8>> {
    let mut child = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-ss")
        .arg("0")
        .arg("-i")
        .arg(input_path)
        .arg("-frames:v")
        .arg("1")
        .arg("-f")
        .arg("image2pipe")
        .arg("-vcodec")
        .arg("png")
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| LibraryError::thumbnail(input_path, format!("failed to spawn ffmpeg: {}", e)))?;

    let mut buffer = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout
            .read_to_end(&mut buffer)
            .map_err(|e| LibraryError::thumbnail(input_path, format!("failed to read ffmpeg output: {}", e)))?;
    }

    let status = child
        .wait()
        .map_err(|e| LibraryError::thumbnail(input_path, format!("failed to wait on ffmpeg: {}", e)))?;
    if !status.success() {
        return Err(LibraryError::thumbnail(
            input_path,
            format!("ffmpeg exited with {}", status),
        ));
    }
    if buffer.is_empty() {
        return Err(LibraryError::thumbnail(input_path, "ffmpeg produced no frame"));
    }

    Ok(buffer)
}
