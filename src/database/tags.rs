use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::database::models::{Tag, TagSource};
use crate::database::repo::MetadataStore;
use crate::error::{LibraryError, Result};
use crate::utils::now_millis;

pub const DEFAULT_TAG_LIMIT: u32 = 50;

impl MetadataStore {
    /// Attaches tags by name, creating missing tags. Blank names are skipped
    /// and existing associations keep their original provenance.
    pub fn add_tags(
        &mut self,
        media_id: &str,
        names: &[String],
        source: TagSource,
        confidence: Option<f64>,
    ) -> Result<()> {
        Self::require_id(media_id)?;
        if !self.media_exists(media_id)? {
            return Err(LibraryError::not_found(format!("media {}", media_id)));
        }

        let now = now_millis();
        let tx = self.conn.transaction()?;
        {
            let mut stmt_tag =
                tx.prepare("INSERT OR IGNORE INTO tags (name, created_at) VALUES (?1, ?2)")?;
            let mut stmt_get_tag_id = tx.prepare("SELECT id FROM tags WHERE name = ?1")?;
            let mut stmt_media_tag = tx.prepare(
                "INSERT OR IGNORE INTO media_tags (media_id, tag_id, source, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
                stmt_tag.execute(params![name, now])?;
                let tag_id: i64 = stmt_get_tag_id.query_row([name], |row| row.get(0))?;
                stmt_media_tag.execute(params![media_id, tag_id, source.as_str(), confidence, now])?;
            }
        }
        tx.commit()?;
        debug!("Tagged {} with {} name(s) ({})", media_id, names.len(), source);
        Ok(())
    }

    /// Drops one association. Missing associations are not an error.
    pub fn remove_tag(&self, media_id: &str, tag_id: i64) -> Result<()> {
        Self::require_id(media_id)?;
        self.conn.execute(
            "DELETE FROM media_tags WHERE media_id = ?1 AND tag_id = ?2",
            params![media_id, tag_id],
        )?;
        Ok(())
    }

    pub fn list_tags(&self, query: Option<&str>, limit: u32) -> Result<Vec<Tag>> {
        let map_tag = |row: &rusqlite::Row<'_>| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        };
        let tags = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT id, name FROM tags WHERE instr(lower(name), lower(?1)) > 0
                     ORDER BY name ASC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![q, limit], map_tag)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare_cached("SELECT id, name FROM tags ORDER BY name ASC LIMIT ?1")?;
                let rows = stmt.query_map([limit], map_tag)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(tags)
    }

    pub fn tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let tag = self
            .conn
            .query_row("SELECT id, name FROM tags WHERE name = ?1", [name], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .optional()?;
        Ok(tag)
    }

    /// Renames a tag, or merges it into the tag that already owns `new_name`.
    ///
    /// On merge every association moves to the target (pairs the target
    /// already has are dropped with their provenance), the old tag is
    /// deleted and the target is returned.
    pub fn rename_tag(&mut self, tag_id: i64, new_name: &str) -> Result<Tag> {
        let next = new_name.trim();
        if next.is_empty() {
            return Err(LibraryError::invalid("tag name must not be empty"));
        }

        let tx = self.conn.transaction()?;
        let current: Option<String> = tx
            .query_row("SELECT name FROM tags WHERE id = ?1", [tag_id], |row| row.get(0))
            .optional()?;
        if current.is_none() {
            return Err(LibraryError::not_found(format!("tag {}", tag_id)));
        }

        let existing: Option<(i64, String)> = tx
            .query_row("SELECT id, name FROM tags WHERE name = ?1", [next], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        let result = match existing {
            Some((target_id, target_name)) if target_id != tag_id => {
                let moved = tx.execute(
                    "UPDATE OR IGNORE media_tags SET tag_id = ?1 WHERE tag_id = ?2",
                    params![target_id, tag_id],
                )?;
                tx.execute("DELETE FROM media_tags WHERE tag_id = ?1", [tag_id])?;
                tx.execute("DELETE FROM tags WHERE id = ?1", [tag_id])?;
                info!(
                    "Merged tag {} into '{}' ({} association(s) moved)",
                    tag_id, target_name, moved
                );
                Tag {
                    id: target_id,
                    name: target_name,
                }
            }
            _ => {
                tx.execute("UPDATE tags SET name = ?1 WHERE id = ?2", params![next, tag_id])?;
                Tag {
                    id: tag_id,
                    name: next.to_string(),
                }
            }
        };
        tx.commit()?;
        Ok(result)
    }

    /// Deletes a tag; its associations go with it, media rows are untouched.
    pub fn delete_tag(&self, tag_id: i64) -> Result<()> {
        let deleted = self.conn.execute("DELETE FROM tags WHERE id = ?1", [tag_id])?;
        if deleted == 0 {
            return Err(LibraryError::not_found(format!("tag {}", tag_id)));
        }
        info!("Deleted tag {}", tag_id);
        Ok(())
    }
}
