use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};

use crate::database::models::{MediaSummary, SmartFolder, SmartFolderPatch};
use crate::database::query::SmartRule;
use crate::database::repo::{list_filtered_on, MetadataStore};
use crate::error::{LibraryError, Result};
use crate::utils::now_millis;

fn clean_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        Err(LibraryError::invalid("smart folder name must not be empty"))
    } else {
        Ok(name)
    }
}

impl MetadataStore {
    pub fn create_smart_folder(&self, name: &str, rule_json: &str) -> Result<SmartFolder> {
        let name = clean_name(name)?;
        SmartRule::parse(rule_json)?;

        let created_at = now_millis();
        self.conn.execute(
            "INSERT INTO smart_folders (name, rule_json, created_at) VALUES (?1, ?2, ?3)",
            params![name, rule_json, created_at],
        )?;
        let folder = SmartFolder {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            rule_json: rule_json.to_string(),
            created_at,
        };
        info!("Created smart folder '{}' ({})", folder.name, folder.id);
        Ok(folder)
    }

    pub fn list_smart_folders(&self) -> Result<Vec<SmartFolder>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, rule_json, created_at FROM smart_folders
             ORDER BY created_at DESC, id DESC",
        )?;
        let folders = stmt
            .query_map([], |row| {
                Ok(SmartFolder {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    rule_json: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(folders)
    }

    pub fn smart_folder(&self, id: i64) -> Result<Option<SmartFolder>> {
        let folder = self
            .conn
            .query_row(
                "SELECT id, name, rule_json, created_at FROM smart_folders WHERE id = ?1",
                [id],
                |row| {
                    Ok(SmartFolder {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        rule_json: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(folder)
    }

    pub fn update_smart_folder(&self, id: i64, patch: &SmartFolderPatch) -> Result<SmartFolder> {
        let mut folder = self
            .smart_folder(id)?
            .ok_or_else(|| LibraryError::not_found(format!("smart folder {}", id)))?;

        if let Some(name) = &patch.name {
            folder.name = clean_name(name)?.to_string();
        }
        if let Some(rule_json) = &patch.rule_json {
            SmartRule::parse(rule_json)?;
            folder.rule_json = rule_json.clone();
        }

        self.conn.execute(
            "UPDATE smart_folders SET name = ?1, rule_json = ?2 WHERE id = ?3",
            params![folder.name, folder.rule_json, id],
        )?;
        Ok(folder)
    }

    pub fn delete_smart_folder(&self, id: i64) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM smart_folders WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(LibraryError::not_found(format!("smart folder {}", id)));
        }
        Ok(())
    }

    /// Re-evaluates the folder's rule against the current library.
    ///
    /// The rule lookup and the listing share one read transaction.
    pub fn list_smart_folder_media(&mut self, id: i64, limit: u32, offset: u32) -> Result<Vec<MediaSummary>> {
        let tx = self.conn.transaction()?;
        let rule_json: String = tx
            .query_row("SELECT rule_json FROM smart_folders WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| LibraryError::not_found(format!("smart folder {}", id)))?;

        let filter = SmartRule::parse(&rule_json)
            .map_err(|e| {
                warn!("Smart folder {} has an unusable rule: {}", id, e);
                e
            })?
            .compile();
        let media = list_filtered_on(&tx, &filter, limit, offset)?;
        tx.commit()?;
        Ok(media)
    }
}
