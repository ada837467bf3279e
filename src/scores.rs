use crate::calc::{Grade, ScoreEntry, ScoreSheet, Term};
use crate::error::EngineError;
use crate::roster::require_exists;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreKey {
    pub student_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub session_id: String,
    pub term: Term,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub subject_id: String,
    pub session_id: String,
    pub term: Term,
    #[serde(flatten)]
    pub sheet: ScoreSheet,
    pub total: i64,
    pub grade: Grade,
    pub remark: String,
    pub subject_position: Option<u32>,
    pub subject_highest: i64,
    pub updated_at: Option<String>,
}

pub(crate) const RECORD_COLUMNS: &str = "id, student_id, class_id, subject_id, session_id, term,
    ca1, ca2, ca3, ca4, test1, test2, exam,
    total, grade, remark, subject_position, subject_highest, updated_at";

pub(crate) fn record_from_row(r: &Row<'_>) -> rusqlite::Result<ScoreRecord> {
    let term_raw: String = r.get(5)?;
    let term = term_raw.parse::<Term>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let grade_raw: String = r.get(14)?;
    let sheet = ScoreSheet {
        ca: [r.get(6)?, r.get(7)?, r.get(8)?, r.get(9)?],
        tests: [r.get(10)?, r.get(11)?],
        exam: r.get(12)?,
    };
    Ok(ScoreRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        class_id: r.get(2)?,
        subject_id: r.get(3)?,
        session_id: r.get(4)?,
        term,
        total: r.get(13)?,
        // Stored grades are always written by save; recompute if a row was edited by hand.
        grade: Grade::from_letter(&grade_raw).unwrap_or_else(|| sheet.grade()),
        sheet,
        remark: r.get(15)?,
        subject_position: r.get(16)?,
        subject_highest: r.get(17)?,
        updated_at: r.get(18)?,
    })
}

fn find_record(conn: &Connection, key: &ScoreKey) -> rusqlite::Result<Option<ScoreRecord>> {
    let sql = format!(
        "SELECT {} FROM score_records
         WHERE student_id = ? AND class_id = ? AND subject_id = ? AND session_id = ? AND term = ?",
        RECORD_COLUMNS
    );
    conn.query_row(
        &sql,
        (
            &key.student_id,
            &key.class_id,
            &key.subject_id,
            &key.session_id,
            key.term.as_str(),
        ),
        record_from_row,
    )
    .optional()
}

pub fn get_score(conn: &Connection, key: &ScoreKey) -> Result<ScoreRecord, EngineError> {
    find_record(conn, key)?.ok_or(EngineError::NotFound("score record"))
}

/// Validates, merges the entry into the stored sheet and upserts the record
/// with fresh total/grade/remark. Ranking fields are left as they are.
pub fn save_score(
    conn: &Connection,
    key: &ScoreKey,
    entry: &ScoreEntry,
) -> Result<ScoreRecord, EngineError> {
    entry.validate()?;
    require_exists(conn, "classes", &key.class_id, "class")?;
    require_exists(conn, "subjects", &key.subject_id, "subject")?;
    require_exists(conn, "academic_sessions", &key.session_id, "session")?;
    let in_class = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (&key.student_id, &key.class_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !in_class {
        return Err(EngineError::NotFound("student"));
    }
    let offered = conn
        .query_row(
            "SELECT 1 FROM class_subjects WHERE class_id = ? AND subject_id = ?",
            (&key.class_id, &key.subject_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !offered {
        return Err(EngineError::NotFound("class subject"));
    }

    let existing = find_record(conn, key)?;
    let mut sheet = existing.as_ref().map(|r| r.sheet).unwrap_or_default();
    entry.apply_to(&mut sheet);
    let total = sheet.total();
    let grade = sheet.grade();
    let id = existing
        .map(|r| r.id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    conn.execute(
        "INSERT INTO score_records(
            id, student_id, class_id, subject_id, session_id, term,
            ca1, ca2, ca3, ca4, test1, test2, exam, total, grade, remark, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
         ON CONFLICT(student_id, class_id, subject_id, session_id, term) DO UPDATE SET
           ca1 = excluded.ca1,
           ca2 = excluded.ca2,
           ca3 = excluded.ca3,
           ca4 = excluded.ca4,
           test1 = excluded.test1,
           test2 = excluded.test2,
           exam = excluded.exam,
           total = excluded.total,
           grade = excluded.grade,
           remark = excluded.remark,
           updated_at = excluded.updated_at",
        rusqlite::params![
            id,
            key.student_id,
            key.class_id,
            key.subject_id,
            key.session_id,
            key.term.as_str(),
            sheet.ca[0],
            sheet.ca[1],
            sheet.ca[2],
            sheet.ca[3],
            sheet.tests[0],
            sheet.tests[1],
            sheet.exam,
            total,
            grade.letter(),
            grade.remark(),
            crate::db::now_stamp(),
        ],
    )?;
    debug!(
        student = %key.student_id,
        subject = %key.subject_id,
        term = key.term.as_str(),
        total,
        "score saved"
    );
    get_score(conn, key)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRow {
    pub index: usize,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSaveOutcome {
    pub saved_count: usize,
    pub records: Vec<ScoreRecord>,
    pub rejected: Vec<RejectedRow>,
}

/// Saves every valid row in one transaction. Rows that fail validation or
/// reference unknown entities are reported and skipped; a database error
/// rolls back the whole batch.
pub fn bulk_save(
    conn: &Connection,
    rows: &[(ScoreKey, ScoreEntry)],
) -> Result<BulkSaveOutcome, EngineError> {
    let tx = conn.unchecked_transaction()?;
    let mut records = Vec::new();
    let mut rejected = Vec::new();
    for (index, (key, entry)) in rows.iter().enumerate() {
        match save_score(&tx, key, entry) {
            Ok(record) => records.push(record),
            Err(e @ (EngineError::Validation { .. } | EngineError::NotFound(_))) => {
                warn!(index, error = %e, "bulk score row rejected");
                rejected.push(RejectedRow {
                    index,
                    code: e.code().to_string(),
                    message: e.to_string(),
                    details: e.details(),
                });
            }
            Err(e) => return Err(e),
        }
    }
    tx.commit()?;
    Ok(BulkSaveOutcome {
        saved_count: records.len(),
        records,
        rejected,
    })
}
