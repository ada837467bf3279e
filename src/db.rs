use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "results.sqlite3";
pub const PASS_MARK_KEY: &str = "promotion.passMark";

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.busy_timeout(busy_timeout)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            admission_number TEXT UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(class_id, subject_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_sessions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            is_current INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            term TEXT NOT NULL,
            ca1 INTEGER NOT NULL DEFAULT 0,
            ca2 INTEGER NOT NULL DEFAULT 0,
            ca3 INTEGER NOT NULL DEFAULT 0,
            ca4 INTEGER NOT NULL DEFAULT 0,
            test1 INTEGER NOT NULL DEFAULT 0,
            test2 INTEGER NOT NULL DEFAULT 0,
            exam INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            grade TEXT NOT NULL DEFAULT 'F',
            remark TEXT NOT NULL DEFAULT 'Fail',
            subject_position INTEGER,
            subject_highest INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id),
            UNIQUE(student_id, class_id, subject_id, session_id, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_records_class_term
         ON score_records(class_id, session_id, term, subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_records_student_session
         ON score_records(student_id, session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_summaries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            term TEXT NOT NULL,
            total_score INTEGER NOT NULL DEFAULT 0,
            average REAL NOT NULL DEFAULT 0,
            position INTEGER,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id),
            UNIQUE(student_id, class_id, session_id, term)
        )",
        [],
    )?;
    // Workspaces created before the divisor was persisted lack subject_count.
    ensure_term_summaries_subject_count(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_term_summaries_class_term
         ON term_summaries(class_id, session_id, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_term_info(
            class_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            term TEXT NOT NULL,
            times_school_opened INTEGER NOT NULL DEFAULT 0,
            next_term_begins TEXT,
            PRIMARY KEY(class_id, session_id, term),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_attendance(
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            term TEXT NOT NULL,
            times_present INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            PRIMARY KEY(student_id, class_id, session_id, term),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_term_summaries_subject_count(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "term_summaries", "subject_count")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE term_summaries ADD COLUMN subject_count INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    // Backfill from the records the summaries were built from.
    conn.execute(
        "UPDATE term_summaries SET subject_count = (
            SELECT COUNT(*) FROM score_records sr
            WHERE sr.student_id = term_summaries.student_id
              AND sr.class_id = term_summaries.class_id
              AND sr.session_id = term_summaries.session_id
              AND sr.term = term_summaries.term
        )",
        [],
    )?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
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

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    // A corrupt value reads as unset so callers fall back to their default.
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn promotion_pass_mark(conn: &Connection) -> rusqlite::Result<f64> {
    Ok(settings_get_json(conn, PASS_MARK_KEY)?
        .and_then(|v| v.as_f64())
        .unwrap_or(crate::calc::DEFAULT_PASS_MARK))
}

pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
pub(crate) fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}
