//! The scene editor and session protocol (§4.8): token-issued read
//! leases, optimistic concurrency against a last-modified snapshot, and
//! automatic renumbering on insert/delete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::hash;
use crate::heading::parse_scene_heading;
use crate::model::{Scene, SceneIdentifier};
use crate::store::{Params, Row, SqlValue, Store};
use crate::vector_index::VectorIndex;
use crate::{Error, Result};

/// How long a read-issued session token remains valid (§3, §8.6).
pub const SESSION_TTL: Duration = Duration::from_secs(10 * 60);

const RECOGNIZED_PREFIXES: &[&str] = &["INT./EXT.", "INT/EXT.", "I/E.", "I/E ", "INT.", "INT ", "EXT.", "EXT "];

/// Where a newly added scene is inserted relative to the identified scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
}

/// A read-issued session: binds a reader to a scene at a specific
/// `version` snapshot for the lifetime of the lease. Lives only in the
/// editor's memory (§3).
///
/// `version` rather than `updated_at` is the concurrency token: the
/// latter is a second-granular SQLite timestamp, so a read and a
/// competing write landing in the same wall-clock second would compare
/// equal and let a concurrent write through undetected.
#[derive(Debug, Clone)]
struct Session {
    scene_id: i64,
    #[allow(dead_code)]
    reader_id: String,
    expires_at: DateTime<Utc>,
    scene_version: i64,
}

#[derive(Debug, Clone)]
pub struct ReadResult {
    pub scene: Scene,
    pub session_token: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AddResult {
    pub created_scene: Scene,
    pub renumbered: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub updated_scene: Scene,
}

#[derive(Debug, Clone)]
pub struct DeleteResult {
    pub renumbered: Vec<i64>,
}

/// Validate that `content` begins (after leading whitespace) with one of
/// the recognized scene-heading prefixes, case-insensitively. This is the
/// editor's only Fountain-validity check — everything else is delegated
/// to an external, advanced validator whose non-header findings downgrade
/// to a warning rather than failing the operation (§4.8).
fn validate_scene_content(content: &str) -> Result<()> {
    let trimmed = content.trim_start();
    let upper = trimmed.to_uppercase();
    if RECOGNIZED_PREFIXES.iter().any(|p| upper.starts_with(p)) {
        Ok(())
    } else {
        Err(Error::InvalidScene(vec!["Missing scene heading".to_owned()]))
    }
}

fn row_text(row: &Row, column: &str) -> String {
    row.get(column).and_then(|v| v.as_str()).unwrap_or_default().to_owned()
}

fn row_opt_text(row: &Row, column: &str) -> Option<String> {
    match row.get(column) {
        Some(SqlValue::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn row_i64(row: &Row, column: &str) -> i64 {
    row.get(column).and_then(|v| v.as_i64()).unwrap_or_default()
}

fn scene_from_row(row: &Row) -> Scene {
    Scene {
        id: row_i64(row, "id"),
        script_id: row_i64(row, "script_id"),
        scene_number: row_i64(row, "scene_number"),
        heading: row_text(row, "heading"),
        location: row_opt_text(row, "location"),
        time_of_day: row_opt_text(row, "time_of_day"),
        content: row_text(row, "content"),
        content_hash: row_text(row, "content_hash"),
        boneyard_metadata: row_opt_text(row, "boneyard_metadata_json")
            .and_then(|s| serde_json::from_str(&s).ok()),
        dialogue: Vec::new(),
        action: Vec::new(),
        original_text: None,
        last_read_at: row_opt_text(row, "last_read_at").and_then(|s| parse_sqlite_timestamp(&s)),
        updated_at: row_opt_text(row, "updated_at")
            .and_then(|s| parse_sqlite_timestamp(&s))
            .unwrap_or_else(Utc::now),
    }
}

fn parse_sqlite_timestamp(s: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// The scene editor: resolves identifiers, issues sessions, and performs
/// validated reads/adds/updates/deletes under optimistic concurrency.
///
/// Holds its store behind an `Arc` (like [`crate::query::QueryEngine`])
/// rather than a borrow, since its session map must outlive any single
/// call — a server wires one editor into its long-lived application
/// state and shares it across requests.
pub struct SceneEditor {
    store: Arc<Store>,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SceneEditor {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn resolve_scene_row(&self, id: &SceneIdentifier) -> Result<Row> {
        let mut params = Params::new();
        params.insert("project".into(), id.project.clone().into());
        params.insert("scene_number".into(), id.scene_number.into());
        params.insert("season".into(), id.season.into());
        params.insert("episode".into(), id.episode.into());

        let sql = "SELECT scenes.* FROM scenes \
                   JOIN scripts ON scripts.id = scenes.script_id \
                   WHERE scripts.title = :project AND scenes.scene_number = :scene_number \
                   AND (:season IS NULL OR scripts.season = :season) \
                   AND (:episode IS NULL OR scripts.episode = :episode)";

        self.store
            .fetch_one(sql, &params)?
            .ok_or_else(|| Error::SceneNotFound(format!("{}#{}", id.project, id.scene_number)))
    }

    fn purge_expired_sessions(&self, now: DateTime<Utc>) {
        self.sessions.lock().unwrap().retain(|_, s| s.expires_at > now);
    }

    /// `read(id, reader_id)`: issues a fresh session bound to the scene's
    /// current `version`, refreshing `last_read_at` first so the
    /// session's snapshot matches the row the caller observed.
    pub fn read(&self, id: &SceneIdentifier, reader_id: &str) -> Result<ReadResult> {
        let row = self.resolve_scene_row(id)?;
        let scene_id = row_i64(&row, "id");

        let mut params = Params::new();
        params.insert("id".into(), scene_id.into());
        self.store
            .execute("UPDATE scenes SET last_read_at = datetime('now') WHERE id = :id", &params)?;

        let fresh = self.resolve_scene_row(id)?;
        let scene = scene_from_row(&fresh);

        let now = Utc::now();
        self.purge_expired_sessions(now);

        let token = Uuid::new_v4();
        let expires_at = now + chrono::Duration::from_std(SESSION_TTL).unwrap();
        self.sessions.lock().unwrap().insert(
            token,
            Session {
                scene_id,
                reader_id: reader_id.to_owned(),
                expires_at,
                scene_version: row_i64(&fresh, "version"),
            },
        );

        Ok(ReadResult {
            scene,
            session_token: token,
            expires_at,
        })
    }

    /// `add(id, content, position)`: validates `content`, shifts every
    /// scene at or after the insertion point up by one, then inserts the
    /// new scene. The whole shift-then-insert runs inside one writer
    /// transaction.
    pub fn add(&self, id: &SceneIdentifier, content: &str, position: Position) -> Result<AddResult> {
        validate_scene_content(content)?;

        let reference = self.resolve_scene_row(id)?;
        let script_id = row_i64(&reference, "script_id");
        let reference_number = row_i64(&reference, "scene_number");
        let new_number = match position {
            Position::Before => reference_number,
            Position::After => reference_number + 1,
        };

        let first_line = content.lines().next().unwrap_or_default().trim();
        let (_, location, time_of_day) = parse_scene_heading(first_line);
        let content_hash = hash::compute_scene_hash(content, true);

        let renumbered = self.store.transaction(|tx| {
            let renumbered = shift_scene_numbers(tx, script_id, new_number, 1)?;

            let clean_content = hash::strip_boneyard(content);
            let boneyard = hash::extract_boneyard(content).map(|v| v.to_string());
            tx.execute(
                "INSERT INTO scenes (script_id, scene_number, heading, location, time_of_day, \
                 content, content_hash, boneyard_metadata_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    script_id,
                    new_number,
                    first_line,
                    location,
                    time_of_day,
                    clean_content,
                    content_hash,
                    boneyard,
                ],
            )?;
            Ok(renumbered)
        })?;

        let created_row = self.resolve_scene_row(&SceneIdentifier {
            project: id.project.clone(),
            scene_number: new_number,
            season: id.season,
            episode: id.episode,
        })?;

        Ok(AddResult {
            created_scene: scene_from_row(&created_row),
            renumbered,
        })
    }

    /// `update(id, content, session_token, reader_id)`: validates content,
    /// checks the session, enforces optimistic concurrency against the
    /// scene's current `version`, then writes the new content.
    pub fn update(
        &self,
        id: &SceneIdentifier,
        content: &str,
        session_token: Uuid,
        _reader_id: &str,
    ) -> Result<UpdateResult> {
        validate_scene_content(content)?;

        let now = Utc::now();
        self.purge_expired_sessions(now);

        let session = {
            let sessions = self.sessions.lock().unwrap();
            sessions.get(&session_token).cloned()
        };
        let Some(session) = session else {
            return Err(Error::SessionInvalid);
        };

        let current = self.resolve_scene_row(id)?;
        if row_i64(&current, "id") != session.scene_id {
            return Err(Error::SessionInvalid);
        }
        if row_i64(&current, "version") != session.scene_version {
            return Err(Error::ConcurrentModification);
        }

        let first_line = content.lines().next().unwrap_or_default().trim();
        let (_, location, time_of_day) = parse_scene_heading(first_line);
        let content_hash = hash::compute_scene_hash(content, true);
        let clean_content = hash::strip_boneyard(content);
        let boneyard = hash::extract_boneyard(content).map(|v| v.to_string());

        let mut params = Params::new();
        params.insert("id".into(), session.scene_id.into());
        params.insert("heading".into(), first_line.to_owned().into());
        params.insert("location".into(), location.into());
        params.insert("time_of_day".into(), time_of_day.into());
        params.insert("content".into(), clean_content.into());
        params.insert("content_hash".into(), content_hash.into());
        params.insert("boneyard_metadata_json".into(), boneyard.into());
        self.store.execute(
            "UPDATE scenes SET heading = :heading, location = :location, \
             time_of_day = :time_of_day, content = :content, content_hash = :content_hash, \
             boneyard_metadata_json = :boneyard_metadata_json WHERE id = :id",
            &params,
        )?;

        // The content hash changed: any stored vector for this scene now
        // describes stale text. Drop it rather than serve a mismatched
        // embedding; the next indexer run regenerates it lazily (see the
        // design's DELETE+INSERT open question).
        VectorIndex::new(&self.store).remove(crate::model::EntityType::Scene, session.scene_id)?;

        self.sessions.lock().unwrap().remove(&session_token);

        let updated = self.resolve_scene_row(id)?;
        Ok(UpdateResult {
            updated_scene: scene_from_row(&updated),
        })
    }

    /// `delete(id, confirm)`: deletes the scene, then compacts scene
    /// numbers after it by one.
    pub fn delete(&self, id: &SceneIdentifier, confirm: bool) -> Result<DeleteResult> {
        if !confirm {
            return Err(Error::InvalidScene(vec![
                "delete requires confirm=true".to_owned(),
            ]));
        }

        let row = self.resolve_scene_row(id)?;
        let scene_id = row_i64(&row, "id");
        let script_id = row_i64(&row, "script_id");
        let number = row_i64(&row, "scene_number");

        let renumbered = self.store.transaction(|tx| {
            tx.execute("DELETE FROM scenes WHERE id = ?1", rusqlite::params![scene_id])?;
            shift_scene_numbers(tx, script_id, number + 1, -1)
        })?;

        Ok(DeleteResult { renumbered })
    }
}

/// Shift every scene in `script_id` numbered `>= from_number` by `delta`.
///
/// Positive shifts process in descending order of `scene_number` so a row
/// is always moved out of the way of the row behind it before that row
/// moves into its old slot — avoiding a transient `UNIQUE(script_id,
/// scene_number)` violation. Negative shifts process ascending for the
/// mirror-image reason. Returns the new (post-shift) scene numbers of
/// every row touched.
fn shift_scene_numbers(
    tx: &rusqlite::Transaction<'_>,
    script_id: i64,
    from_number: i64,
    delta: i64,
) -> Result<Vec<i64>> {
    let order = if delta > 0 { "DESC" } else { "ASC" };
    let mut stmt = tx.prepare(&format!(
        "SELECT id, scene_number FROM scenes WHERE script_id = ?1 AND scene_number >= ?2 ORDER BY scene_number {order}"
    ))?;
    let rows: Vec<(i64, i64)> = stmt
        .query_map(rusqlite::params![script_id, from_number], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })?
        .collect::<rusqlite::Result<_>>()?;
    drop(stmt);

    let mut renumbered = Vec::with_capacity(rows.len());
    for (id, number) in rows {
        let new_number = number + delta;
        tx.execute(
            "UPDATE scenes SET scene_number = ?1 WHERE id = ?2",
            rusqlite::params![new_number, id],
        )?;
        renumbered.push(new_number);
    }
    renumbered.sort_unstable();
    Ok(renumbered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;

    fn test_store() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(
            dir.path().join("test.db"),
            &StoreConfig {
                update_gitignore: false,
                ..StoreConfig::default()
            },
        )
        .unwrap();
        (dir, Arc::new(store))
    }

    fn seed_script(store: &Store, scene_count: i64) -> i64 {
        let mut params = Params::new();
        params.insert("title".into(), "demo".into());
        params.insert("file_path".into(), "demo.fountain".into());
        store
            .execute(
                "INSERT INTO scripts (title, file_path) VALUES (:title, :file_path)",
                &params,
            )
            .unwrap();
        let script_id = store
            .fetch_one("SELECT id FROM scripts", &Params::new())
            .unwrap()
            .unwrap()
            .get("id")
            .unwrap()
            .as_i64()
            .unwrap();

        for n in 1..=scene_count {
            let mut p = Params::new();
            p.insert("script_id".into(), script_id.into());
            p.insert("scene_number".into(), n.into());
            p.insert("heading".into(), format!("INT. ROOM {n} - DAY").into());
            p.insert("content".into(), format!("Body {n}.").into());
            p.insert("content_hash".into(), format!("hash{n}").into());
            store
                .execute(
                    "INSERT INTO scenes (script_id, scene_number, heading, content, content_hash) \
                     VALUES (:script_id, :scene_number, :heading, :content, :content_hash)",
                    &p,
                )
                .unwrap();
        }
        script_id
    }

    fn id(number: i64) -> SceneIdentifier {
        SceneIdentifier {
            project: "demo".into(),
            scene_number: number,
            season: None,
            episode: None,
        }
    }

    #[test]
    fn read_issues_session_and_refreshes_last_read_at() {
        let (_dir, store) = test_store();
        seed_script(&store, 2);
        let editor = SceneEditor::new(Arc::clone(&store));
        let result = editor.read(&id(2), "agent-1").unwrap();
        assert_eq!(result.scene.scene_number, 2);
        assert!(result.scene.last_read_at.is_some());
    }

    #[test]
    fn update_with_valid_session_succeeds() {
        let (_dir, store) = test_store();
        seed_script(&store, 2);
        let editor = SceneEditor::new(Arc::clone(&store));
        let read = editor.read(&id(2), "agent-1").unwrap();

        let result = editor
            .update(&id(2), "INT. OFFICE - NIGHT\n\nBob enters.", read.session_token, "agent-1")
            .unwrap();
        assert_eq!(result.updated_scene.time_of_day.as_deref(), Some("NIGHT"));
        assert_eq!(result.updated_scene.heading, "INT. OFFICE - NIGHT");
    }

    #[test]
    fn update_with_unknown_token_fails() {
        let (_dir, store) = test_store();
        seed_script(&store, 1);
        let editor = SceneEditor::new(Arc::clone(&store));
        let err = editor
            .update(&id(1), "INT. OFFICE - NIGHT\n\nBob.", Uuid::new_v4(), "agent-1")
            .unwrap_err();
        assert!(matches!(err, Error::SessionInvalid));
    }

    #[test]
    fn update_after_concurrent_write_fails() {
        let (_dir, store) = test_store();
        seed_script(&store, 1);
        let editor = SceneEditor::new(Arc::clone(&store));
        let read = editor.read(&id(1), "agent-1").unwrap();

        // Someone else updates the scene's content out from under the session.
        let mut params = Params::new();
        params.insert("id".into(), read.scene.id.into());
        params.insert("content".into(), "Changed by someone else.".into());
        store
            .execute("UPDATE scenes SET content = :content WHERE id = :id", &params)
            .unwrap();

        let err = editor
            .update(&id(1), "INT. OFFICE - NIGHT\n\nBob.", read.session_token, "agent-1")
            .unwrap_err();
        assert!(matches!(err, Error::ConcurrentModification));
    }

    #[test]
    fn update_rejects_content_without_heading() {
        let (_dir, store) = test_store();
        seed_script(&store, 1);
        let editor = SceneEditor::new(Arc::clone(&store));
        let read = editor.read(&id(1), "agent-1").unwrap();
        let err = editor
            .update(&id(1), "Just some text.", read.session_token, "agent-1")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidScene(_)));
    }

    #[test]
    fn add_after_shifts_subsequent_scenes() {
        let (_dir, store) = test_store();
        seed_script(&store, 3);
        let editor = SceneEditor::new(Arc::clone(&store));
        let result = editor
            .add(&id(1), "INT. PARK - DAY\n\nGrass.", Position::After)
            .unwrap();

        assert_eq!(result.created_scene.scene_number, 2);
        assert_eq!(result.renumbered, vec![3, 4]);

        let rows = store
            .fetch_all(
                "SELECT scene_number FROM scenes ORDER BY scene_number",
                &Params::new(),
            )
            .unwrap();
        let numbers: Vec<i64> = rows.iter().map(|r| r.get("scene_number").unwrap().as_i64().unwrap()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[test]
    fn delete_compacts_subsequent_scenes() {
        let (_dir, store) = test_store();
        seed_script(&store, 3);
        let editor = SceneEditor::new(Arc::clone(&store));
        editor.add(&id(1), "INT. PARK - DAY\n\nGrass.", Position::After).unwrap();

        let result = editor.delete(&id(2), true).unwrap();
        assert_eq!(result.renumbered, vec![2, 3]);

        let rows = store
            .fetch_all(
                "SELECT scene_number FROM scenes ORDER BY scene_number",
                &Params::new(),
            )
            .unwrap();
        let numbers: Vec<i64> = rows.iter().map(|r| r.get("scene_number").unwrap().as_i64().unwrap()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn delete_without_confirm_fails() {
        let (_dir, store) = test_store();
        seed_script(&store, 1);
        let editor = SceneEditor::new(Arc::clone(&store));
        let err = editor.delete(&id(1), false).unwrap_err();
        assert!(matches!(err, Error::InvalidScene(_)));
    }

    #[test]
    fn add_rejects_invalid_heading() {
        let (_dir, store) = test_store();
        seed_script(&store, 1);
        let editor = SceneEditor::new(Arc::clone(&store));
        let err = editor.add(&id(1), "Not a heading.", Position::After).unwrap_err();
        assert!(matches!(err, Error::InvalidScene(_)));
    }
}
