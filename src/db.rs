use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "qcm.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS qcms(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            icon_class TEXT,
            status TEXT NOT NULL,
            difficulty_level TEXT,
            passing_threshold INTEGER,
            created_at TEXT,
            last_score INTEGER,
            last_time INTEGER,
            is_favorite INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS qcm_pages(
            id TEXT PRIMARY KEY,
            qcm_id TEXT NOT NULL,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            FOREIGN KEY(qcm_id) REFERENCES qcms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_qcm_pages_qcm ON qcm_pages(qcm_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_qcm_pages_qcm_position ON qcm_pages(qcm_id, position)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            qcm_id TEXT NOT NULL,
            page_id TEXT NOT NULL,
            text TEXT NOT NULL,
            kind TEXT NOT NULL,
            options_json TEXT NOT NULL,
            correct_answers_json TEXT NOT NULL,
            explanation TEXT,
            position INTEGER NOT NULL,
            FOREIGN KEY(qcm_id) REFERENCES qcms(id),
            FOREIGN KEY(page_id) REFERENCES qcm_pages(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_qcm ON questions(qcm_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_page ON questions(page_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_page_position ON questions(page_id, position)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id TEXT PRIMARY KEY,
            event TEXT NOT NULL,
            entity TEXT NOT NULL,
            entity_id TEXT,
            user_id TEXT,
            before_json TEXT,
            after_json TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity, created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_created ON audit_log(created_at)",
        [],
    )?;

    // Workspaces created before play-stats tracking lack these columns.
    ensure_qcms_stats_columns(&conn)?;

    Ok(conn)
}

fn ensure_qcms_stats_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "qcms", "last_score")? {
        conn.execute("ALTER TABLE qcms ADD COLUMN last_score INTEGER", [])?;
    }
    if !table_has_column(conn, "qcms", "last_time")? {
        conn.execute("ALTER TABLE qcms ADD COLUMN last_time INTEGER", [])?;
    }
    if !table_has_column(conn, "qcms", "is_favorite")? {
        conn.execute(
            "ALTER TABLE qcms ADD COLUMN is_favorite INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Append an entry to the audit trail. Event names follow the
/// `<entity>.<action>` pattern, e.g. "qcm.created".
pub fn record_audit(
    conn: &Connection,
    event: &str,
    entity: &str,
    entity_id: Option<&str>,
    user_id: Option<&str>,
    before: Option<&serde_json::Value>,
    after: Option<&serde_json::Value>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO audit_log(id, event, entity, entity_id, user_id, before_json, after_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            event,
            entity,
            entity_id,
            user_id,
            before.map(|v| v.to_string()),
            after.map(|v| v.to_string()),
            now_rfc3339(),
        ),
    )?;
    Ok(())
}
