//! Serves stored originals and thumbnails by id, honoring byte ranges.
//!
//! Routes:
//! - `GET /thumb/<id>`
//! - `GET /orig/<id>`

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Take};
use std::path::PathBuf;

use http::{header, Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::{LibraryError, Result};
use crate::ingest::hasher::is_content_id;

const OCTET_STREAM: &str = "application/octet-stream";
const THUMB_ROUTE: &str = "/thumb/";
const ORIGINAL_ROUTE: &str = "/orig/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaResource {
    Thumbnail,
    Original,
}

/// Absolute location and content type of a servable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub mime: Option<String>,
}

/// Maps a media id to the file behind one of its resources.
pub trait MediaResolver {
    fn resolve(&self, resource: MediaResource, id: &str) -> Result<Option<ResolvedFile>>;
}

/// Inclusive byte span within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Parses a single `bytes=start-end`, `bytes=start-` or `bytes=-suffix`
    /// range and clamps it to `size`.
    pub fn parse(header: &str, size: u64) -> Result<Self> {
        let unsatisfiable = || LibraryError::RangeNotSatisfiable { size };

        let trimmed = header.trim();
        let rest = trimmed
            .get(..6)
            .filter(|unit| unit.eq_ignore_ascii_case("bytes="))
            .map(|_| &trimmed[6..])
            .ok_or_else(unsatisfiable)?;
        let (first, last) = rest.split_once('-').ok_or_else(unsatisfiable)?;
        let first = parse_position(first).ok_or_else(unsatisfiable)?;
        let last = parse_position(last).ok_or_else(unsatisfiable)?;
        let final_byte = size.checked_sub(1).ok_or_else(unsatisfiable)?;

        let (start, end) = match (first, last) {
            (None, None) => return Err(unsatisfiable()),
            (None, Some(0)) => return Err(unsatisfiable()),
            (None, Some(suffix)) => (size.saturating_sub(suffix), final_byte),
            (Some(start), last) => (start, last.map_or(final_byte, |e| e.min(final_byte))),
        };

        if start >= size || end < start {
            return Err(unsatisfiable());
        }
        Ok(Self { start, end })
    }
}

/// `Some(None)` for an empty position, `None` for anything but ASCII digits.
/// Overlong numbers saturate, which clamps like any other out-of-range value.
fn parse_position(text: &str) -> Option<Option<u64>> {
    if text.is_empty() {
        return Some(None);
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(Some(text.parse().unwrap_or(u64::MAX)))
}

/// Response body that reads the selected span from disk on demand.
#[derive(Debug, Default)]
pub struct MediaBody {
    inner: Option<Take<File>>,
}

impl MediaBody {
    pub fn empty() -> Self {
        Self::default()
    }

    fn span(mut file: File, start: u64, len: u64) -> io::Result<Self> {
        file.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner: Some(file.take(len)),
        })
    }
}

impl Read for MediaBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }
}

/// Stateless request handler over a [`MediaResolver`].
pub struct MediaServer<'a, R: MediaResolver + ?Sized> {
    resolver: &'a R,
}

impl<'a, R: MediaResolver + ?Sized> MediaServer<'a, R> {
    pub fn new(resolver: &'a R) -> Self {
        Self { resolver }
    }

    /// Any failure while resolving or opening the file answers 404.
    pub fn serve(&self, resource: MediaResource, id: &str, range: Option<&str>) -> Response<MediaBody> {
        match self.try_serve(resource, id, range) {
            Ok(response) => response,
            Err(e) => {
                warn!("Serving {:?} {} failed: {}", resource, id, e);
                not_found()
            }
        }
    }

    /// Routes a request path to [`serve`](Self::serve), reading the `Range` header.
    pub fn handle(&self, request: &Request<()>) -> Response<MediaBody> {
        let path = request.uri().path();
        let (resource, id) = if let Some(id) = path.strip_prefix(THUMB_ROUTE) {
            (MediaResource::Thumbnail, id)
        } else if let Some(id) = path.strip_prefix(ORIGINAL_ROUTE) {
            (MediaResource::Original, id)
        } else {
            debug!("No route for {}", path);
            return not_found();
        };

        // A header that is not visible ASCII can only be an unsatisfiable range.
        let range = request
            .headers()
            .get(header::RANGE)
            .map(|value| value.to_str().unwrap_or_default());
        self.serve(resource, id, range)
    }

    fn try_serve(
        &self,
        resource: MediaResource,
        id: &str,
        range: Option<&str>,
    ) -> Result<Response<MediaBody>> {
        if !is_content_id(id) {
            debug!("Rejected malformed id {:?}", id);
            return Ok(not_found());
        }
        let Some(resolved) = self.resolver.resolve(resource, id)? else {
            return Ok(not_found());
        };

        let file = File::open(&resolved.path)
            .map_err(|e| LibraryError::io("failed to open stored file", &resolved.path, e))?;
        let meta = file
            .metadata()
            .map_err(|e| LibraryError::io("failed to stat stored file", &resolved.path, e))?;
        if !meta.is_file() {
            return Ok(not_found());
        }
        let size = meta.len();
        let content_type = resolved.mime.as_deref().unwrap_or(OCTET_STREAM);

        let Some(range) = range else {
            let body = MediaBody::span(file, 0, size)
                .map_err(|e| LibraryError::io("failed to read stored file", &resolved.path, e))?;
            return Ok(build(
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_LENGTH, size)
                    .header(header::ACCEPT_RANGES, "bytes"),
                body,
            ));
        };

        match ByteRange::parse(range, size) {
            Ok(span) => {
                let body = MediaBody::span(file, span.start, span.len())
                    .map_err(|e| LibraryError::io("failed to seek stored file", &resolved.path, e))?;
                Ok(build(
                    Response::builder()
                        .status(StatusCode::PARTIAL_CONTENT)
                        .header(header::CONTENT_TYPE, content_type)
                        .header(header::CONTENT_LENGTH, span.len())
                        .header(header::ACCEPT_RANGES, "bytes")
                        .header(
                            header::CONTENT_RANGE,
                            format!("bytes {}-{}/{}", span.start, span.end, size),
                        ),
                    body,
                ))
            }
            Err(e) => {
                debug!("Range {:?} on {} rejected: {}", range, id, e);
                Ok(build(
                    Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(header::CONTENT_RANGE, format!("bytes */{}", size))
                        .header(header::CONTENT_LENGTH, 0u64),
                    MediaBody::empty(),
                ))
            }
        }
    }
}

fn build(builder: http::response::Builder, body: MediaBody) -> Response<MediaBody> {
    builder.body(body).unwrap_or_else(|e| {
        warn!("Could not assemble response: {}", e);
        not_found()
    })
}

fn not_found() -> Response<MediaBody> {
    let mut response = Response::new(MediaBody::empty());
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
