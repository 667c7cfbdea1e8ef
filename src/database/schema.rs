pub const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
";

pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS media (
        id TEXT PRIMARY KEY,
        original_filename TEXT NOT NULL,
        stored_path TEXT NOT NULL,
        mime TEXT,
        size INTEGER NOT NULL,
        width INTEGER,
        height INTEGER,
        duration_ms INTEGER,
        imported_at INTEGER NOT NULL,
        title TEXT,
        note TEXT,
        rating INTEGER NOT NULL DEFAULT 0 CHECK (rating BETWEEN 0 AND 5),
        source_url TEXT,
        thumb_path TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_media_imported_at ON media(imported_at DESC);
    CREATE INDEX IF NOT EXISTS idx_media_title ON media(title);

    CREATE TABLE IF NOT EXISTS media_sources (
        media_id TEXT NOT NULL,
        source_path TEXT NOT NULL,
        imported_at INTEGER NOT NULL,
        PRIMARY KEY (media_id, source_path),
        FOREIGN KEY (media_id) REFERENCES media(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_media_sources_media_id ON media_sources(media_id);

    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS media_tags (
        media_id TEXT NOT NULL,
        tag_id INTEGER NOT NULL,
        source TEXT NOT NULL DEFAULT 'manual',
        confidence REAL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (media_id, tag_id),
        FOREIGN KEY (media_id) REFERENCES media(id) ON DELETE CASCADE,
        FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_media_tags_tag_id ON media_tags(tag_id);

    CREATE TABLE IF NOT EXISTS smart_folders (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        rule_json TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value_json TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );

    -- Trigram tokens give substring matching over title and note.
    CREATE VIRTUAL TABLE IF NOT EXISTS media_fts USING fts5(
        media_id UNINDEXED,
        title,
        note,
        tokenize = 'trigram'
    );

    CREATE TRIGGER IF NOT EXISTS media_fts_ai AFTER INSERT ON media BEGIN
        INSERT INTO media_fts (media_id, title, note)
        VALUES (NEW.id, COALESCE(NEW.title, ''), COALESCE(NEW.note, ''));
    END;

    CREATE TRIGGER IF NOT EXISTS media_fts_au AFTER UPDATE OF title, note ON media BEGIN
        UPDATE media_fts
        SET title = COALESCE(NEW.title, ''), note = COALESCE(NEW.note, '')
        WHERE media_id = NEW.id;
    END;

    CREATE TRIGGER IF NOT EXISTS media_fts_ad AFTER DELETE ON media BEGIN
        DELETE FROM media_fts WHERE media_id = OLD.id;
    END;
";

/// Re-adds any media rows missing from the full-text index.
pub const FTS_BACKFILL: &str = "
    INSERT INTO media_fts (media_id, title, note)
    SELECT id, COALESCE(title, ''), COALESCE(note, '')
    FROM media
    WHERE id NOT IN (SELECT media_id FROM media_fts);
";
