use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::database::models::{
    DuplicateGroup, MediaDetails, MediaSummary, MediaTagInfo, MetaPatch, NewMedia,
    StoredLocation, TagSource, SUMMARY_COLUMNS,
};
use crate::database::query::{compile_search, Filter, SearchParams, MAX_RATING};
use crate::database::schema::{FTS_BACKFILL, PRAGMAS, SCHEMA};
use crate::error::{LibraryError, Result};
use crate::ingest::hasher::is_content_id;
use crate::utils::now_millis;

pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Relational and full-text index for one library.
pub struct MetadataStore {
    pub(crate) conn: Connection,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        let backfilled = conn.execute(FTS_BACKFILL, [])?;
        if backfilled > 0 {
            info!("Backfilled {} media rows into the full-text index", backfilled);
        }
        debug!("Opened metadata store at {:?}", path);
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn require_id(id: &str) -> Result<()> {
        if is_content_id(id) {
            Ok(())
        } else {
            Err(LibraryError::invalid(format!("malformed media id '{}'", id)))
        }
    }

    pub fn media_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM media WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Records one more location that produced `id`. Repeats are ignored.
    pub fn add_source(&self, id: &str, source_path: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO media_sources (media_id, source_path, imported_at)
             VALUES (?1, ?2, ?3)",
            params![id, source_path, now_millis()],
        )?;
        Ok(inserted > 0)
    }

    /// Dedup gate: when `id` is already stored, records `source_path` against
    /// it and returns whether that source was new. `None` means the content
    /// is not in the library yet.
    pub fn append_source_if_stored(&mut self, id: &str, source_path: &str) -> Result<Option<bool>> {
        let tx = self.conn.transaction()?;
        let found: Option<i64> = tx
            .query_row("SELECT 1 FROM media WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        if found.is_none() {
            return Ok(None);
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO media_sources (media_id, source_path, imported_at)
             VALUES (?1, ?2, ?3)",
            params![id, source_path, now_millis()],
        )?;
        tx.commit()?;
        Ok(Some(inserted > 0))
    }

    /// Inserts the media row and its first source in one transaction.
    ///
    /// Returns false when the hash was already present; the source is still
    /// recorded in that case.
    pub fn insert_media(&mut self, media: &NewMedia) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO media (
                id, original_filename, stored_path, mime, size, width, height,
                imported_at, title, thumb_path
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO NOTHING",
            params![
                media.id,
                media.original_filename,
                media.stored_path,
                media.mime,
                media.size as i64,
                media.width,
                media.height,
                media.imported_at,
                media.title,
                media.thumb_path,
            ],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO media_sources (media_id, source_path, imported_at)
             VALUES (?1, ?2, ?3)",
            params![media.id, media.source_path, media.imported_at],
        )?;
        tx.commit()?;
        Ok(inserted > 0)
    }

    pub fn list_media(&self, limit: u32, offset: u32) -> Result<Vec<MediaSummary>> {
        self.list_filtered(&Filter::default(), limit, offset)
    }

    pub fn search(&self, params: &SearchParams, limit: u32, offset: u32) -> Result<Vec<MediaSummary>> {
        self.list_filtered(&compile_search(params), limit, offset)
    }

    pub(crate) fn list_filtered(&self, filter: &Filter, limit: u32, offset: u32) -> Result<Vec<MediaSummary>> {
        list_filtered_on(&self.conn, filter, limit, offset)
    }

    pub fn media_details(&self, id: &str) -> Result<Option<MediaDetails>> {
        Self::require_id(id)?;
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {}, m.note, m.rating, m.size, m.width, m.height,
                            m.duration_ms, m.source_url
                     FROM media m WHERE m.id = ?1",
                    SUMMARY_COLUMNS
                ),
                [id],
                |row| {
                    Ok(MediaDetails {
                        summary: MediaSummary::from_row(row)?,
                        note: row.get(6)?,
                        rating: row.get(7)?,
                        size: row.get::<_, i64>(8)?.max(0) as u64,
                        width: row.get(9)?,
                        height: row.get(10)?,
                        duration_ms: row.get(11)?,
                        source_url: row.get(12)?,
                        tags: Vec::new(),
                        sources: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut details) = row else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare_cached(
            "SELECT t.id, t.name, mt.source, mt.confidence
             FROM media_tags mt
             JOIN tags t ON t.id = mt.tag_id
             WHERE mt.media_id = ?1
             ORDER BY t.name ASC",
        )?;
        let tags = stmt
            .query_map([id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (tag_id, name, source, confidence) in tags {
            details.tags.push(MediaTagInfo {
                id: tag_id,
                name,
                source: source.parse().unwrap_or(TagSource::Manual),
                confidence,
            });
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT source_path FROM media_sources
             WHERE media_id = ?1
             ORDER BY imported_at DESC, rowid DESC",
        )?;
        details.sources = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(Some(details))
    }

    /// Applies a three-valued patch: absent fields keep their stored value.
    pub fn set_meta(&mut self, id: &str, patch: &MetaPatch) -> Result<()> {
        Self::require_id(id)?;
        if let Some(rating) = patch.rating {
            if rating > MAX_RATING {
                return Err(LibraryError::invalid(format!(
                    "rating must be between 0 and {}, got {}",
                    MAX_RATING, rating
                )));
            }
        }

        let tx = self.conn.transaction()?;
        let current = tx
            .query_row(
                "SELECT title, note, rating FROM media WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, u8>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((title, note, rating)) = current else {
            return Err(LibraryError::not_found(format!("media {}", id)));
        };

        let title = patch.title.clone().unwrap_or(title);
        let note = patch.note.clone().unwrap_or(note);
        let rating = patch.rating.unwrap_or(rating);

        tx.execute(
            "UPDATE media SET title = ?1, note = ?2, rating = ?3 WHERE id = ?4",
            params![title, note, rating, id],
        )?;
        tx.commit()?;
        debug!("Updated metadata for {}", id);
        Ok(())
    }

    /// Groups media by source count, keeping only those seen at more than one path.
    pub fn list_duplicate_groups(&self, limit: u32, offset: u32) -> Result<Vec<DuplicateGroup>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {}, COUNT(ms.source_path) AS source_count
             FROM media_sources ms
             JOIN media m ON m.id = ms.media_id
             GROUP BY ms.media_id
             HAVING COUNT(ms.source_path) > 1
             ORDER BY source_count DESC, m.imported_at DESC
             LIMIT ?1 OFFSET ?2",
            SUMMARY_COLUMNS
        ))?;
        let groups = stmt
            .query_map(params![limit, offset], |row| {
                Ok(DuplicateGroup {
                    media: MediaSummary::from_row(row)?,
                    source_count: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    pub fn stored_location(&self, id: &str) -> Result<Option<StoredLocation>> {
        let location = self
            .conn
            .query_row(
                "SELECT stored_path, thumb_path, mime, original_filename FROM media WHERE id = ?1",
                [id],
                |row| {
                    Ok(StoredLocation {
                        stored_path: row.get(0)?,
                        thumb_path: row.get(1)?,
                        mime: row.get(2)?,
                        original_filename: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(location)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<JsonValue>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn set_setting(&self, key: &str, value: &JsonValue) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(LibraryError::invalid("setting key must not be empty"));
        }
        self.conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at",
            params![key, serde_json::to_string(value)?, now_millis()],
        )?;
        Ok(())
    }
}

/// Runs a compiled filter as a listing, newest first.
pub(crate) fn list_filtered_on(
    conn: &Connection,
    filter: &Filter,
    limit: u32,
    offset: u32,
) -> Result<Vec<MediaSummary>> {
    let sql = format!(
        "SELECT {} FROM media m {} ORDER BY m.imported_at DESC, m.rowid DESC LIMIT ? OFFSET ?",
        SUMMARY_COLUMNS,
        filter.where_sql()
    );
    let mut bound = filter.params().to_vec();
    bound.push(rusqlite::types::Value::Integer(limit as i64));
    bound.push(rusqlite::types::Value::Integer(offset as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bound.iter()), MediaSummary::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{media_id, new_media};

    #[test]
    fn test_insert_is_idempotent_per_hash() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let media = new_media(1, "/src/a.png");
        assert!(store.insert_media(&media).unwrap());

        let mut again = media.clone();
        again.source_path = "/src/b.png".into();
        assert!(!store.insert_media(&again).unwrap());
        assert!(!store.add_source(&media.id, "/src/b.png").unwrap());

        let details = store.media_details(&media.id).unwrap().unwrap();
        assert_eq!(details.sources.len(), 2);
        assert_eq!(store.list_media(10, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_append_source_only_for_stored_content() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let media = new_media(1, "/src/a.png");

        assert_eq!(store.append_source_if_stored(&media.id, "/src/b.png").unwrap(), None);
        let orphans: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM media_sources", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);

        store.insert_media(&media).unwrap();
        assert_eq!(
            store.append_source_if_stored(&media.id, "/src/b.png").unwrap(),
            Some(true)
        );
        assert_eq!(
            store.append_source_if_stored(&media.id, "/src/b.png").unwrap(),
            Some(false)
        );
        let details = store.media_details(&media.id).unwrap().unwrap();
        assert_eq!(details.sources.len(), 2);
    }

    #[test]
    fn test_set_meta_is_three_valued() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let media = new_media(1, "/src/a.png");
        store.insert_media(&media).unwrap();

        store
            .set_meta(
                &media.id,
                &MetaPatch {
                    note: Some(Some("first note".into())),
                    rating: Some(4),
                    ..Default::default()
                },
            )
            .unwrap();
        let details = store.media_details(&media.id).unwrap().unwrap();
        assert_eq!(details.summary.title.as_deref(), Some("media-1"));
        assert_eq!(details.note.as_deref(), Some("first note"));
        assert_eq!(details.rating, 4);

        store
            .set_meta(
                &media.id,
                &MetaPatch {
                    title: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        let details = store.media_details(&media.id).unwrap().unwrap();
        assert_eq!(details.summary.title, None);
        assert_eq!(details.note.as_deref(), Some("first note"));
        assert_eq!(details.rating, 4);
    }

    #[test]
    fn test_set_meta_rejects_bad_input() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let patch = MetaPatch {
            rating: Some(6),
            ..Default::default()
        };
        let media = new_media(1, "/src/a.png");
        store.insert_media(&media).unwrap();
        assert!(matches!(
            store.set_meta(&media.id, &patch),
            Err(LibraryError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.set_meta("../etc", &MetaPatch::default()),
            Err(LibraryError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.set_meta(&media_id(9), &MetaPatch::default()),
            Err(LibraryError::NotFound(_))
        ));
    }

    #[test]
    fn test_full_text_tracks_updates() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let media = new_media(1, "/src/a.png");
        store.insert_media(&media).unwrap();
        let by_text = |store: &MetadataStore, text: &str| {
            store
                .search(
                    &SearchParams {
                        text: Some(text.into()),
                        ..Default::default()
                    },
                    10,
                    0,
                )
                .unwrap()
                .len()
        };

        assert_eq!(by_text(&store, "edia-"), 1);
        assert_eq!(by_text(&store, "harbor"), 0);

        store
            .set_meta(
                &media.id,
                &MetaPatch {
                    title: Some(Some("Sunset over the Harbor".into())),
                    note: Some(Some("shot from the pier".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_text(&store, "harbor"), 1);
        assert_eq!(by_text(&store, "unset ov"), 1);
        assert_eq!(by_text(&store, "pier"), 1);
        assert_eq!(by_text(&store, "er"), 1);
        assert_eq!(by_text(&store, "edia-"), 0);

        store
            .conn
            .execute("DELETE FROM media WHERE id = ?1", [&media.id])
            .unwrap();
        let fts_rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM media_fts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fts_rows, 0);
    }

    #[test]
    fn test_listing_orders_newest_first_and_filters_mime() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let mut older = new_media(1, "/src/a.png");
        older.imported_at = 1_000;
        let mut newer = new_media(2, "/src/b.mp4");
        newer.imported_at = 2_000;
        newer.mime = Some("video/mp4".into());
        store.insert_media(&older).unwrap();
        store.insert_media(&newer).unwrap();

        let all = store.list_media(10, 0).unwrap();
        assert_eq!(
            all.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec![newer.id.as_str(), older.id.as_str()]
        );
        assert_eq!(store.list_media(1, 1).unwrap()[0].id, older.id);

        let videos = store
            .search(
                &SearchParams {
                    mime_prefix: Some("video".into()),
                    ..Default::default()
                },
                10,
                0,
            )
            .unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].id, newer.id);
    }

    #[test]
    fn test_duplicate_groups_order_by_source_count() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        let single = new_media(1, "/src/only.png");
        let twice = new_media(2, "/src/two-a.png");
        let thrice = new_media(3, "/src/three-a.png");
        for media in [&single, &twice, &thrice] {
            store.insert_media(media).unwrap();
        }
        store.add_source(&twice.id, "/src/two-b.png").unwrap();
        store.add_source(&thrice.id, "/src/three-b.png").unwrap();
        store.add_source(&thrice.id, "/src/three-c.png").unwrap();

        let groups = store.list_duplicate_groups(10, 0).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].media.id, thrice.id);
        assert_eq!(groups[0].source_count, 3);
        assert_eq!(groups[1].media.id, twice.id);
        assert_eq!(groups[1].source_count, 2);
    }

    #[test]
    fn test_settings_round_trip() {
        let store = MetadataStore::open_in_memory().unwrap();
        assert_eq!(store.get_setting("aiConfig").unwrap(), None);

        let value = serde_json::json!({"baseUrl": "http://localhost:8080", "model": "vl"});
        store.set_setting("aiConfig", &value).unwrap();
        store.set_setting("aiConfig", &value).unwrap();
        assert_eq!(store.get_setting("aiConfig").unwrap(), Some(value));

        assert!(matches!(
            store.set_setting("  ", &JsonValue::Null),
            Err(LibraryError::InvalidArgument(_))
        ));
    }
}
