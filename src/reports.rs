use crate::calc::{auto_comment, ordinal, round_2, Promotion};
use crate::error::EngineError;
use crate::results::TermKey;
use crate::roster::{
    attendance_against, class_term_info, display_name, require_exists, ClassTermInfo,
    StudentAttendance,
};
use crate::scores::{record_from_row, ScoreRecord, RECORD_COLUMNS};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub student_id: String,
    pub display_name: String,
    pub admission_number: Option<String>,
    pub total_score: i64,
    pub subject_count: i64,
    pub average: f64,
    pub average_display: f64,
    pub position: Option<u32>,
    pub position_display: String,
    pub promotion: Promotion,
}

/// Ranked first, then unranked; ties by class sort order.
pub fn term_summaries(conn: &Connection, key: &TermKey) -> Result<Vec<SummaryRow>, EngineError> {
    let pass_mark = crate::db::promotion_pass_mark(conn)?;
    let mut stmt = conn.prepare(
        "SELECT ts.student_id, st.last_name, st.first_name, st.admission_number,
                ts.total_score, ts.subject_count, ts.average, ts.position
         FROM term_summaries ts
         JOIN students st ON st.id = ts.student_id
         WHERE ts.class_id = ? AND ts.session_id = ? AND ts.term = ?
         ORDER BY ts.position IS NULL, ts.position, st.sort_order, st.id",
    )?;
    let rows = stmt
        .query_map(
            (&key.class_id, &key.session_id, key.term.as_str()),
            |r| {
                let last: String = r.get(1)?;
                let first: String = r.get(2)?;
                let average: f64 = r.get(6)?;
                let position: Option<u32> = r.get(7)?;
                Ok(SummaryRow {
                    student_id: r.get(0)?,
                    display_name: display_name(&last, &first),
                    admission_number: r.get(3)?,
                    total_score: r.get(4)?,
                    subject_count: r.get(5)?,
                    average,
                    average_display: round_2(average),
                    position,
                    position_display: ordinal(position),
                    promotion: Promotion::for_average(average, pass_mark),
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportLine {
    pub subject_name: String,
    #[serde(flatten)]
    pub record: ScoreRecord,
    pub subject_position_display: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTermReport {
    pub student_id: String,
    pub display_name: String,
    pub admission_number: Option<String>,
    pub class_name: String,
    pub session_name: String,
    pub lines: Vec<ReportLine>,
    pub summary: Option<SummaryRow>,
    pub class_info: ClassTermInfo,
    pub attendance: StudentAttendance,
    pub promotion: Option<Promotion>,
    /// Banded on the term average; absent until results are computed.
    pub auto_comment: Option<String>,
}

pub fn student_term_report(
    conn: &Connection,
    student_id: &str,
    key: &TermKey,
) -> Result<StudentTermReport, EngineError> {
    let class_name: Option<String> = conn
        .query_row("SELECT name FROM classes WHERE id = ?", [&key.class_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(class_name) = class_name else {
        return Err(EngineError::NotFound("class"));
    };
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
    require_exists(conn, "academic_sessions", &key.session_id, "session")?;
    let session_name: String = conn.query_row(
        "SELECT name FROM academic_sessions WHERE id = ?",
        [&key.session_id],
        |r| r.get(0),
    )?;

    let sql = format!(
        "SELECT {}, (SELECT name FROM subjects s WHERE s.id = score_records.subject_id)
         FROM score_records
         WHERE student_id = ? AND class_id = ? AND session_id = ? AND term = ?
         ORDER BY 20, id",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let lines = stmt
        .query_map(
            (student_id, &key.class_id, &key.session_id, key.term.as_str()),
            |r| {
                let record = record_from_row(r)?;
                Ok(ReportLine {
                    subject_name: r.get(19)?,
                    subject_position_display: ordinal(record.subject_position),
                    record,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let summary = term_summaries(conn, key)?
        .into_iter()
        .find(|row| row.student_id == student_id);
    let promotion = summary.as_ref().map(|s| s.promotion);
    let comment = summary
        .as_ref()
        .map(|s| auto_comment(s.average).to_string());
    let class_info = class_term_info(conn, key)?;
    let attendance = attendance_against(conn, student_id, &class_info)?;
    Ok(StudentTermReport {
        student_id: student_id.to_string(),
        display_name: display_name(&last, &first),
        admission_number,
        class_name,
        session_name,
        lines,
        summary,
        class_info,
        attendance,
        promotion,
        auto_comment: comment,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSheetRow {
    pub display_name: String,
    #[serde(flatten)]
    pub record: ScoreRecord,
    pub subject_position_display: String,
}

/// One subject's records, best first; unranked rows last.
pub fn subject_sheet(
    conn: &Connection,
    key: &TermKey,
    subject_id: &str,
) -> Result<Vec<SubjectSheetRow>, EngineError> {
    require_exists(conn, "subjects", subject_id, "subject")?;
    let sql = format!(
        "SELECT {}, (SELECT last_name FROM students st WHERE st.id = score_records.student_id),
                (SELECT first_name FROM students st WHERE st.id = score_records.student_id)
         FROM score_records
         WHERE class_id = ? AND subject_id = ? AND session_id = ? AND term = ?
         ORDER BY subject_position IS NULL, subject_position, total DESC, student_id",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (&key.class_id, subject_id, &key.session_id, key.term.as_str()),
            |r| {
                let record = record_from_row(r)?;
                let last: String = r.get(19)?;
                let first: String = r.get(20)?;
                Ok(SubjectSheetRow {
                    display_name: display_name(&last, &first),
                    subject_position_display: ordinal(record.subject_position),
                    record,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadsheetSubject {
    pub subject_id: String,
    pub name: String,
    pub highest: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadsheetRow {
    pub student_id: String,
    pub display_name: String,
    /// Aligned with `subjects`; `None` where no record exists.
    pub totals: Vec<Option<i64>>,
    pub summary: Option<SummaryRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Broadsheet {
    pub subjects: Vec<BroadsheetSubject>,
    pub rows: Vec<BroadsheetRow>,
}

pub fn broadsheet(conn: &Connection, key: &TermKey) -> Result<Broadsheet, EngineError> {
    require_exists(conn, "classes", &key.class_id, "class")?;
    require_exists(conn, "academic_sessions", &key.session_id, "session")?;

    let mut subj_stmt = conn.prepare(
        "SELECT s.id, s.name, MAX(sr.subject_highest)
         FROM score_records sr
         JOIN subjects s ON s.id = sr.subject_id
         WHERE sr.class_id = ? AND sr.session_id = ? AND sr.term = ?
         GROUP BY s.id, s.name
         ORDER BY s.name",
    )?;
    let subjects = subj_stmt
        .query_map(
            (&key.class_id, &key.session_id, key.term.as_str()),
            |r| {
                Ok(BroadsheetSubject {
                    subject_id: r.get(0)?,
                    name: r.get(1)?,
                    highest: r.get(2)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let column: HashMap<&str, usize> = subjects
        .iter()
        .enumerate()
        .map(|(i, s)| (s.subject_id.as_str(), i))
        .collect();

    let mut cell_stmt = conn.prepare(
        "SELECT student_id, subject_id, total FROM score_records
         WHERE class_id = ? AND session_id = ? AND term = ?",
    )?;
    let cells = cell_stmt
        .query_map(
            (&key.class_id, &key.session_id, key.term.as_str()),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let mut totals_by_student: HashMap<String, Vec<Option<i64>>> = HashMap::new();
    for (student_id, subject_id, total) in cells {
        let Some(&i) = column.get(subject_id.as_str()) else {
            continue;
        };
        totals_by_student
            .entry(student_id)
            .or_insert_with(|| vec![None; subjects.len()])[i] = Some(total);
    }

    let mut summaries: HashMap<String, SummaryRow> = term_summaries(conn, key)?
        .into_iter()
        .map(|s| (s.student_id.clone(), s))
        .collect();

    let students = crate::roster::list_students(conn, &key.class_id)?;
    let rows = students
        .into_iter()
        .filter(|s| s.active)
        .map(|s| BroadsheetRow {
            totals: totals_by_student
                .remove(&s.id)
                .unwrap_or_else(|| vec![None; subjects.len()]),
            summary: summaries.remove(&s.id),
            student_id: s.id,
            display_name: s.display_name,
        })
        .collect();

    Ok(Broadsheet { subjects, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::{ScoreEntry, ScoreInput, Term};
    use crate::results::compute_term_results;
    use crate::scores::fixtures::{school, School};
    use crate::scores::{save_score, ScoreKey};

    fn enter(s: &School, student: usize, subject: usize, exam: i64) {
        save_score(
            &s.conn,
            &ScoreKey {
                student_id: s.students[student].clone(),
                class_id: s.class_id.clone(),
                subject_id: s.subjects[subject].clone(),
                session_id: s.session_id.clone(),
                term: Term::First,
            },
            &ScoreEntry {
                inputs: vec![ScoreInput::LegacyTests([20, 20])],
                exam: Some(exam),
            },
        )
        .expect("save");
    }

    fn key(s: &School) -> TermKey {
        TermKey {
            class_id: s.class_id.clone(),
            session_id: s.session_id.clone(),
            term: Term::First,
        }
    }

    #[test]
    fn summaries_are_ordered_by_position_with_ordinals() {
        let s = school(&["Adeyemi", "Bello", "Chukwu"], &["Mathematics"]);
        enter(&s, 0, 0, 5);
        enter(&s, 1, 0, 50);
        enter(&s, 2, 0, 30);
        compute_term_results(&s.conn, &key(&s)).expect("compute");

        let rows = term_summaries(&s.conn, &key(&s)).expect("summaries");
        let got: Vec<(&str, &str, Promotion)> = rows
            .iter()
            .map(|r| (r.display_name.as_str(), r.position_display.as_str(), r.promotion))
            .collect();
        assert_eq!(
            got,
            vec![
                ("Bello, Test", "1st", Promotion::Promoted),
                ("Chukwu, Test", "2nd", Promotion::Promoted),
                ("Adeyemi, Test", "3rd", Promotion::Repeat),
            ]
        );
    }

    #[test]
    fn student_report_without_computation_has_no_summary() {
        let s = school(&["Adeyemi"], &["Mathematics", "English"]);
        enter(&s, 0, 1, 25);
        enter(&s, 0, 0, 45);
        let report = student_term_report(&s.conn, &s.students[0], &key(&s)).expect("report");
        assert_eq!(report.lines.len(), 2);
        assert_eq!(report.lines[0].subject_name, "English");
        assert_eq!(report.lines[0].subject_position_display, "-");
        assert!(report.summary.is_none());
        assert!(report.promotion.is_none());

        compute_term_results(&s.conn, &key(&s)).expect("compute");
        let report = student_term_report(&s.conn, &s.students[0], &key(&s)).expect("report");
        assert_eq!(report.lines[1].record.total, 85);
        assert_eq!(report.lines[1].subject_position_display, "1st");
        assert_eq!(report.summary.as_ref().map(|s| s.total_score), Some(150));
        assert_eq!(report.class_info.class_population, 1);
    }

    #[test]
    fn student_report_carries_attendance_and_auto_comment() {
        let s = school(&["Adeyemi"], &["Mathematics"]);
        enter(&s, 0, 0, 32);
        let report = student_term_report(&s.conn, &s.students[0], &key(&s)).expect("report");
        assert!(report.auto_comment.is_none());
        assert_eq!(report.attendance.times_present, 0);
        assert_eq!(report.attendance.attendance_percentage, 0.0);

        crate::roster::update_class_term_info(
            &s.conn,
            &key(&s),
            &crate::roster::ClassTermInfoPatch {
                times_school_opened: Some(90),
                next_term_begins: None,
            },
        )
        .expect("opened");
        crate::roster::update_attendance(&s.conn, &s.students[0], &key(&s), 81).expect("present");
        compute_term_results(&s.conn, &key(&s)).expect("compute");

        let report = student_term_report(&s.conn, &s.students[0], &key(&s)).expect("report");
        assert_eq!(report.summary.as_ref().map(|s| s.average), Some(72.0));
        assert_eq!(
            report.auto_comment.as_deref(),
            Some("A very good performance. You have shown great potential. Keep it up.")
        );
        assert_eq!(report.attendance.times_present, 81);
        assert_eq!(report.attendance.times_school_opened, 90);
        assert_eq!(report.attendance.attendance_percentage, 90.0);
    }

    #[test]
    fn broadsheet_aligns_cells_with_subject_columns() {
        let s = school(&["Adeyemi", "Bello"], &["Mathematics", "English"]);
        enter(&s, 0, 0, 50);
        enter(&s, 1, 1, 20);
        compute_term_results(&s.conn, &key(&s)).expect("compute");

        let sheet = broadsheet(&s.conn, &key(&s)).expect("broadsheet");
        let names: Vec<&str> = sheet.subjects.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["English", "Mathematics"]);
        assert_eq!(sheet.subjects[1].highest, 90);
        assert_eq!(sheet.rows[0].totals, vec![None, Some(90)]);
        assert_eq!(sheet.rows[1].totals, vec![Some(60), None]);
        assert_eq!(sheet.rows[0].summary.as_ref().and_then(|s| s.position), Some(1));
    }

    #[test]
    fn subject_sheet_lists_best_first() {
        let s = school(&["Adeyemi", "Bello"], &["Mathematics"]);
        enter(&s, 0, 0, 10);
        enter(&s, 1, 0, 40);
        compute_term_results(&s.conn, &key(&s)).expect("compute");
        let rows = subject_sheet(&s.conn, &key(&s), &s.subjects[0]).expect("sheet");
        assert_eq!(rows[0].display_name, "Bello, Test");
        assert_eq!(rows[0].record.subject_highest, 80);
        assert_eq!(rows[1].subject_position_display, "2nd");
    }
}
