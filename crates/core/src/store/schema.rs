//! Schema DDL and migrations for the embedded store.
//!
//! Schema version is tracked in `PRAGMA user_version`. Each entry in
//! [`MIGRATIONS`] is applied in order starting from the database's current
//! version; the final version must equal [`SCHEMA_VERSION`] or
//! [`crate::Error::SchemaMismatch`] is raised.

use rusqlite::Connection;

use crate::Result;

/// Compiled-in schema version. Bump this and append a migration when the
/// DDL changes.
pub const SCHEMA_VERSION: i64 = 1;

const MIGRATIONS: &[&str] = &[
    // v1: initial schema.
    r#"
    CREATE TABLE scripts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        author TEXT,
        season INTEGER,
        episode INTEGER,
        file_path TEXT NOT NULL UNIQUE,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE scenes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        script_id INTEGER NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
        scene_number INTEGER NOT NULL,
        heading TEXT NOT NULL,
        location TEXT,
        time_of_day TEXT,
        content TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        boneyard_metadata_json TEXT,
        last_read_at TEXT,
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        version INTEGER NOT NULL DEFAULT 0,
        UNIQUE(script_id, scene_number)
    );

    CREATE INDEX idx_scenes_script ON scenes(script_id);
    CREATE INDEX idx_scenes_content_hash ON scenes(content_hash);

    CREATE TABLE dialogues (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scene_id INTEGER NOT NULL REFERENCES scenes(id) ON DELETE CASCADE,
        character TEXT NOT NULL,
        text TEXT NOT NULL,
        order_in_scene INTEGER NOT NULL
    );

    CREATE INDEX idx_dialogues_scene ON dialogues(scene_id);

    CREATE TABLE actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scene_id INTEGER NOT NULL REFERENCES scenes(id) ON DELETE CASCADE,
        text TEXT NOT NULL,
        order_in_scene INTEGER NOT NULL
    );

    CREATE INDEX idx_actions_scene ON actions(scene_id);

    CREATE TABLE script_bibles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        script_id INTEGER NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
        file_path TEXT NOT NULL,
        title TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(script_id, file_path)
    );

    CREATE TABLE bible_chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bible_id INTEGER NOT NULL REFERENCES script_bibles(id) ON DELETE CASCADE,
        chunk_number INTEGER NOT NULL,
        heading TEXT NOT NULL,
        level INTEGER NOT NULL,
        content TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        parent_chunk_id INTEGER REFERENCES bible_chunks(id) ON DELETE SET NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        UNIQUE(bible_id, chunk_number)
    );

    CREATE INDEX idx_bible_chunks_bible ON bible_chunks(bible_id);

    CREATE TABLE scene_embeddings (
        entity_id INTEGER NOT NULL REFERENCES scenes(id) ON DELETE CASCADE,
        model TEXT NOT NULL,
        vector BLOB NOT NULL,
        PRIMARY KEY (entity_id, model)
    );

    CREATE TABLE bible_chunk_embeddings (
        entity_id INTEGER NOT NULL REFERENCES bible_chunks(id) ON DELETE CASCADE,
        model TEXT NOT NULL,
        vector BLOB NOT NULL,
        PRIMARY KEY (entity_id, model)
    );

    -- Legacy blob-backed embedding table, kept around only as the source
    -- for migrate_from_blob_storage (see vector_index.rs).
    CREATE TABLE IF NOT EXISTS embeddings (
        entity_type TEXT NOT NULL,
        entity_id INTEGER NOT NULL,
        model TEXT NOT NULL,
        vector BLOB NOT NULL,
        PRIMARY KEY (entity_type, entity_id, model)
    );

    -- Excludes last_read_at: a plain read (scene_read bumping only
    -- last_read_at) must not advance updated_at/version, or every read
    -- would invalidate every session issued against the scene it just
    -- read. version is a monotonic counter alongside updated_at because
    -- updated_at's second-granularity timestamp lets two writes in the
    -- same wall-clock second compare equal, which would let a second,
    -- concurrent write slip past optimistic-concurrency checks.
    CREATE TRIGGER trg_scenes_updated_at
    AFTER UPDATE ON scenes
    FOR EACH ROW
    WHEN NEW.content IS NOT OLD.content
      OR NEW.heading IS NOT OLD.heading
      OR NEW.location IS NOT OLD.location
      OR NEW.time_of_day IS NOT OLD.time_of_day
      OR NEW.content_hash IS NOT OLD.content_hash
      OR NEW.scene_number IS NOT OLD.scene_number
      OR NEW.boneyard_metadata_json IS NOT OLD.boneyard_metadata_json
    BEGIN
        UPDATE scenes SET updated_at = datetime('now'), version = OLD.version + 1 WHERE id = NEW.id;
    END;

    CREATE TRIGGER trg_scripts_updated_at
    AFTER UPDATE ON scripts
    FOR EACH ROW
    BEGIN
        UPDATE scripts SET updated_at = datetime('now') WHERE id = NEW.id;
    END;
    "#,
];

/// Apply every migration after the database's current `user_version`, then
/// verify the final version matches [`SCHEMA_VERSION`].
pub fn migrate(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current > SCHEMA_VERSION {
        return Err(crate::Error::SchemaMismatch {
            found: current,
            expected: SCHEMA_VERSION,
        });
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = i as i64 + 1;
        if version <= current {
            continue;
        }
        conn.execute_batch(migration)?;
        conn.pragma_update(None, "user_version", version)?;
    }

    let final_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if final_version != SCHEMA_VERSION {
        return Err(crate::Error::SchemaMismatch {
            found: final_version,
            expected: SCHEMA_VERSION,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
    }

    #[test]
    fn downgrade_is_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();
        let err = migrate(&conn).unwrap_err();
        assert!(matches!(err, crate::Error::SchemaMismatch { .. }));
    }
}
