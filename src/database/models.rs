use std::fmt;
use std::str::FromStr;

use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::LibraryError;

/// Provenance of a media/tag association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    Manual,
    Ai,
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::Manual => "manual",
            TagSource::Ai => "ai",
        }
    }
}

impl fmt::Display for TagSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagSource {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TagSource::Manual),
            "ai" => Ok(TagSource::Ai),
            other => Err(LibraryError::invalid(format!("unknown tag source '{}'", other))),
        }
    }
}

/// Listing row for a media item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSummary {
    pub id: String,
    pub title: Option<String>,
    pub original_filename: String,
    pub mime: Option<String>,
    pub imported_at: i64,
    pub has_thumbnail: bool,
}

/// Column list matching [`MediaSummary::from_row`], for a `media` table aliased `m`.
pub(crate) const SUMMARY_COLUMNS: &str =
    "m.id, m.title, m.original_filename, m.mime, m.imported_at, m.thumb_path";

impl MediaSummary {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            original_filename: row.get(2)?,
            mime: row.get(3)?,
            imported_at: row.get(4)?,
            has_thumbnail: row.get::<_, Option<String>>(5)?.is_some(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTagInfo {
    pub id: i64,
    pub name: String,
    pub source: TagSource,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDetails {
    #[serde(flatten)]
    pub summary: MediaSummary,
    pub note: Option<String>,
    pub rating: u8,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<i64>,
    pub source_url: Option<String>,
    pub tags: Vec<MediaTagInfo>,
    pub sources: Vec<String>,
}

/// Row written once per distinct content hash, together with its first source.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub id: String,
    pub original_filename: String,
    pub stored_path: String,
    pub mime: Option<String>,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub imported_at: i64,
    pub title: Option<String>,
    pub thumb_path: Option<String>,
    pub source_path: String,
}

/// Partial update: `None` leaves a field alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaPatch {
    pub title: Option<Option<String>>,
    pub note: Option<Option<String>>,
    pub rating: Option<u8>,
}

impl MetaPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.note.is_none() && self.rating.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartFolder {
    pub id: i64,
    pub name: String,
    pub rule_json: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartFolderPatch {
    pub name: Option<String>,
    pub rule_json: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub media: MediaSummary,
    pub source_count: u32,
}

/// Paths and mime of one stored item, relative to the library root.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLocation {
    pub stored_path: String,
    pub thumb_path: Option<String>,
    pub mime: Option<String>,
    pub original_filename: String,
}
