use crate::calc::{
    aggregate_term, cumulate, rank_class, rank_subject, ClassPlacement, CumulativeSummary,
    SubjectRanking, SubjectScore, Term, TermAggregate, TermTotal,
};
use crate::error::EngineError;
use crate::roster::require_exists;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermKey {
    pub class_id: String,
    pub session_id: String,
    pub term: Term,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeOutcome {
    pub subjects_ranked: usize,
    pub records_ranked: usize,
    pub summaries_written: usize,
    pub summaries_removed: usize,
}

/// Recomputes subject positions/highests, term summaries and class positions
/// for one class/session/term inside a single transaction. An empty key is
/// a no-op. Safe to re-run.
pub fn compute_term_results(conn: &Connection, key: &TermKey) -> Result<ComputeOutcome, EngineError> {
    let started = Instant::now();
    let tx = conn.unchecked_transaction()?;
    let mut outcome = ComputeOutcome::default();

    for subject_id in subjects_with_records(&tx, key)? {
        let scores = load_subject_scores(&tx, key, &subject_id)?;
        let ranking = rank_subject(&scores);
        apply_subject_ranking(&tx, &ranking)?;
        debug!(
            subject = %subject_id,
            records = ranking.placements.len(),
            highest = ranking.highest,
            "subject ranked"
        );
        if !ranking.placements.is_empty() {
            outcome.subjects_ranked += 1;
            outcome.records_ranked += ranking.placements.len();
        }
    }

    let aggregates = aggregate_term(load_student_totals(&tx, key)?);
    upsert_summaries(&tx, key, &aggregates)?;
    outcome.summaries_written = aggregates.len();
    outcome.summaries_removed = remove_unattempted_summaries(&tx, key)?;

    let placements = rank_class(&aggregates);
    apply_class_positions(&tx, key, &placements)?;

    tx.commit()?;
    info!(
        class = %key.class_id,
        session = %key.session_id,
        term = key.term.as_str(),
        subjects = outcome.subjects_ranked,
        students = outcome.summaries_written,
        removed = outcome.summaries_removed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "term results computed"
    );
    Ok(outcome)
}

fn subjects_with_records(conn: &Connection, key: &TermKey) -> Result<Vec<String>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT subject_id FROM score_records
         WHERE class_id = ? AND session_id = ? AND term = ?
         ORDER BY subject_id",
    )?;
    let ids = stmt
        .query_map(
            (&key.class_id, &key.session_id, key.term.as_str()),
            |r| r.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn load_subject_scores(
    conn: &Connection,
    key: &TermKey,
    subject_id: &str,
) -> Result<Vec<SubjectScore>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, total FROM score_records
         WHERE class_id = ? AND subject_id = ? AND session_id = ? AND term = ?",
    )?;
    let scores = stmt
        .query_map(
            (&key.class_id, subject_id, &key.session_id, key.term.as_str()),
            |r| {
                Ok(SubjectScore {
                    record_id: r.get(0)?,
                    student_id: r.get(1)?,
                    total: r.get(2)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scores)
}

fn apply_subject_ranking(conn: &Connection, ranking: &SubjectRanking) -> Result<(), EngineError> {
    let mut stmt = conn.prepare(
        "UPDATE score_records SET subject_position = ?, subject_highest = ? WHERE id = ?",
    )?;
    for p in &ranking.placements {
        stmt.execute((p.position, ranking.highest, &p.record_id))?;
    }
    Ok(())
}

fn load_student_totals(conn: &Connection, key: &TermKey) -> Result<Vec<(String, i64)>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT student_id, total FROM score_records
         WHERE class_id = ? AND session_id = ? AND term = ?",
    )?;
    let rows = stmt
        .query_map(
            (&key.class_id, &key.session_id, key.term.as_str()),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn upsert_summaries(
    conn: &Connection,
    key: &TermKey,
    aggregates: &[TermAggregate],
) -> Result<(), EngineError> {
    let now = crate::db::now_stamp();
    let mut stmt = conn.prepare(
        "INSERT INTO term_summaries(
            id, student_id, class_id, session_id, term, total_score, subject_count, average, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, class_id, session_id, term) DO UPDATE SET
           total_score = excluded.total_score,
           subject_count = excluded.subject_count,
           average = excluded.average,
           updated_at = excluded.updated_at",
    )?;
    for a in aggregates {
        stmt.execute((
            Uuid::new_v4().to_string(),
            &a.student_id,
            &key.class_id,
            &key.session_id,
            key.term.as_str(),
            a.total_score,
            a.subject_count as i64,
            a.average,
            &now,
        ))?;
    }
    Ok(())
}

/// Drops summaries whose student no longer has any record for the key.
fn remove_unattempted_summaries(conn: &Connection, key: &TermKey) -> Result<usize, EngineError> {
    let removed = conn.execute(
        "DELETE FROM term_summaries
         WHERE class_id = ?1 AND session_id = ?2 AND term = ?3
           AND student_id NOT IN (
             SELECT student_id FROM score_records
             WHERE class_id = ?1 AND session_id = ?2 AND term = ?3
           )",
        (&key.class_id, &key.session_id, key.term.as_str()),
    )?;
    Ok(removed)
}

fn apply_class_positions(
    conn: &Connection,
    key: &TermKey,
    placements: &[ClassPlacement],
) -> Result<(), EngineError> {
    let mut stmt = conn.prepare(
        "UPDATE term_summaries SET position = ?
         WHERE student_id = ? AND class_id = ? AND session_id = ? AND term = ?",
    )?;
    for p in placements {
        stmt.execute((
            p.position,
            &p.student_id,
            &key.class_id,
            &key.session_id,
            key.term.as_str(),
        ))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeReport {
    pub student_id: String,
    pub display_name: String,
    pub admission_number: Option<String>,
    pub session_id: String,
    pub session_name: String,
    #[serde(flatten)]
    pub summary: CumulativeSummary,
}

/// Read-only session view for one student across all terms and classes.
pub fn cumulative_result(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
) -> Result<CumulativeReport, EngineError> {
    let student: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT last_name, first_name, admission_number FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((last, first, admission_number)) = student else {
        return Err(EngineError::NotFound("student"));
    };
    require_exists(conn, "academic_sessions", session_id, "session")?;
    let session_name: String = conn.query_row(
        "SELECT name FROM academic_sessions WHERE id = ?",
        [session_id],
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT sr.subject_id, s.name, sr.term, sr.total
         FROM score_records sr
         JOIN subjects s ON s.id = sr.subject_id
         WHERE sr.student_id = ? AND sr.session_id = ?
         ORDER BY sr.updated_at, sr.id",
    )?;
    let rows = stmt
        .query_map((student_id, session_id), |r| {
            let term_raw: String = r.get(2)?;
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, term_raw, r.get::<_, i64>(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut totals = Vec::with_capacity(rows.len());
    for (subject_id, subject_name, term_raw, total) in rows {
        let term = term_raw.parse::<Term>()?;
        totals.push(TermTotal {
            subject_id,
            subject_name,
            term,
            total,
        });
    }

    let pass_mark = crate::db::promotion_pass_mark(conn)?;
    Ok(CumulativeReport {
        student_id: student_id.to_string(),
        display_name: crate::roster::display_name(&last, &first),
        admission_number,
        session_id: session_id.to_string(),
        session_name,
        summary: cumulate(totals, pass_mark),
    })
}
