use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

pub const CA_MAX: i64 = 10;
pub const TEST_MAX: i64 = 20;
pub const EXAM_MAX: i64 = 60;
pub const DEFAULT_PASS_MARK: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    First,
    Second,
    Third,
}

impl Term {
    pub fn as_str(self) -> &'static str {
        match self {
            Term::First => "First",
            Term::Second => "Second",
            Term::Third => "Third",
        }
    }

    pub fn from_index(n: i64) -> Option<Term> {
        match n {
            1 => Some(Term::First),
            2 => Some(Term::Second),
            3 => Some(Term::Third),
            _ => None,
        }
    }
}

impl FromStr for Term {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t.eq_ignore_ascii_case("first") || t == "1" {
            Ok(Term::First)
        } else if t.eq_ignore_ascii_case("second") || t == "2" {
            Ok(Term::Second)
        } else if t.eq_ignore_ascii_case("third") || t == "3" {
            Ok(Term::Third)
        } else {
            Err(EngineError::validation(
                "term",
                format!("unknown term '{}' (expected First, Second or Third)", t),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Grade {
    /// Closed thresholds evaluated high to low; the first match wins.
    pub fn for_score(score: f64) -> Grade {
        if score >= 80.0 {
            Grade::A
        } else if score >= 70.0 {
            Grade::B
        } else if score >= 60.0 {
            Grade::C
        } else if score >= 50.0 {
            Grade::D
        } else if score >= 40.0 {
            Grade::E
        } else {
            Grade::F
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::F => "F",
        }
    }

    pub fn remark(self) -> &'static str {
        match self {
            Grade::A => "Excellent",
            Grade::B => "Very Good",
            Grade::C => "Good",
            Grade::D => "Pass",
            Grade::E => "Fair",
            Grade::F => "Fail",
        }
    }

    pub fn from_letter(s: &str) -> Option<Grade> {
        match s.trim() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "E" => Some(Grade::E),
            "F" => Some(Grade::F),
            _ => None,
        }
    }
}

/// One group of raw assessment marks, chosen explicitly by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreInput {
    Continuous([i64; 4]),
    LegacyTests([i64; 2]),
}

impl ScoreInput {
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            ScoreInput::Continuous(ca) => {
                for (i, v) in ca.iter().enumerate() {
                    check_range(&format!("ca{}", i + 1), *v, CA_MAX)?;
                }
            }
            ScoreInput::LegacyTests(tests) => {
                for (i, v) in tests.iter().enumerate() {
                    check_range(&format!("test{}", i + 1), *v, TEST_MAX)?;
                }
            }
        }
        Ok(())
    }

    fn sum(&self) -> i64 {
        match self {
            ScoreInput::Continuous(ca) => ca.iter().sum(),
            ScoreInput::LegacyTests(tests) => tests.iter().sum(),
        }
    }
}

fn check_range(field: &str, value: i64, max: i64) -> Result<(), EngineError> {
    if (0..=max).contains(&value) {
        return Ok(());
    }
    Err(EngineError::validation(
        field,
        format!("must be between 0 and {} (got {})", max, value),
    ))
}

/// The stored raw marks of a score record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSheet {
    pub ca: [i64; 4],
    pub tests: [i64; 2],
    pub exam: i64,
}

impl ScoreSheet {
    pub fn apply(&mut self, input: ScoreInput) {
        match input {
            ScoreInput::Continuous(ca) => self.ca = ca,
            ScoreInput::LegacyTests(tests) => self.tests = tests,
        }
    }

    /// Continuous assessment wins as soon as any CA mark is non-zero,
    /// even when legacy test marks are also stored.
    pub fn effective_input(&self) -> ScoreInput {
        let ca = ScoreInput::Continuous(self.ca);
        if ca.sum() > 0 {
            ca
        } else {
            ScoreInput::LegacyTests(self.tests)
        }
    }

    pub fn total(&self) -> i64 {
        self.effective_input().sum() + self.exam
    }

    pub fn grade(&self) -> Grade {
        Grade::for_score(self.total() as f64)
    }
}

/// What an entry surface submits for one record. Groups that are absent
/// keep their stored values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreEntry {
    pub inputs: Vec<ScoreInput>,
    pub exam: Option<i64>,
}

impl ScoreEntry {
    pub fn validate(&self) -> Result<(), EngineError> {
        for input in &self.inputs {
            input.validate()?;
        }
        if let Some(exam) = self.exam {
            check_range("exam", exam, EXAM_MAX)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, sheet: &mut ScoreSheet) {
        for input in &self.inputs {
            sheet.apply(*input);
        }
        if let Some(exam) = self.exam {
            sheet.exam = exam;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<K, V> {
    pub key: K,
    pub value: V,
    pub position: u32,
}

/// Standard competition ("1224") ranking, highest value first. Equal values
/// share a position; the next lower value takes its 1-based index. Ties are
/// ordered by key so the output is reproducible.
pub fn competition_rank<K, V>(mut entries: Vec<(K, V)>) -> Vec<Ranked<K, V>>
where
    K: Ord,
    V: PartialOrd + Copy,
{
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let mut out = Vec::with_capacity(entries.len());
    let mut position: u32 = 1;
    let mut last: Option<V> = None;
    for (index, (key, value)) in entries.into_iter().enumerate() {
        if let Some(prev) = last {
            if value < prev {
                position = index as u32 + 1;
            }
        }
        out.push(Ranked {
            key,
            value,
            position,
        });
        last = Some(value);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectScore {
    pub record_id: String,
    pub student_id: String,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPlacement {
    pub record_id: String,
    pub student_id: String,
    pub total: i64,
    pub position: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectRanking {
    pub highest: i64,
    pub placements: Vec<SubjectPlacement>,
}

pub fn rank_subject(scores: &[SubjectScore]) -> SubjectRanking {
    let entries: Vec<((String, String), i64)> = scores
        .iter()
        .map(|s| ((s.student_id.clone(), s.record_id.clone()), s.total))
        .collect();
    let placements: Vec<SubjectPlacement> = competition_rank(entries)
        .into_iter()
        .map(|r| SubjectPlacement {
            student_id: r.key.0,
            record_id: r.key.1,
            total: r.value,
            position: r.position,
        })
        .collect();
    let highest = placements.first().map(|p| p.total).unwrap_or(0);
    SubjectRanking {
        highest,
        placements,
    }
}

pub fn safe_average(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / (count as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermAggregate {
    pub student_id: String,
    pub total_score: i64,
    pub subject_count: usize,
    pub average: f64,
}

/// Groups `(student_id, total)` pairs per student. Students without any pair
/// never appear in the output.
pub fn aggregate_term<I, S>(totals: I) -> Vec<TermAggregate>
where
    I: IntoIterator<Item = (S, i64)>,
    S: Into<String>,
{
    let mut by_student: BTreeMap<String, (i64, usize)> = BTreeMap::new();
    for (student_id, total) in totals {
        let entry = by_student.entry(student_id.into()).or_insert((0, 0));
        entry.0 += total;
        entry.1 += 1;
    }
    by_student
        .into_iter()
        .map(|(student_id, (total_score, subject_count))| TermAggregate {
            student_id,
            total_score,
            subject_count,
            average: safe_average(total_score as f64, subject_count),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassPlacement {
    pub student_id: String,
    pub average: f64,
    pub position: u32,
}

pub fn rank_class(aggregates: &[TermAggregate]) -> Vec<ClassPlacement> {
    let entries: Vec<(String, f64)> = aggregates
        .iter()
        .map(|a| (a.student_id.clone(), a.average))
        .collect();
    competition_rank(entries)
        .into_iter()
        .map(|r| ClassPlacement {
            student_id: r.key,
            average: r.value,
            position: r.position,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Promotion {
    Promoted,
    Repeat,
}

impl Promotion {
    pub fn for_average(average: f64, pass_mark: f64) -> Promotion {
        if average >= pass_mark {
            Promotion::Promoted
        } else {
            Promotion::Repeat
        }
    }
}

/// Class teacher's comment for a term average; bands are inclusive at the lower edge.
pub fn auto_comment(average: f64) -> &'static str {
    if average >= 80.0 {
        "An excellent result. You are a star! Keep up the brilliant performance."
    } else if average >= 70.0 {
        "A very good performance. You have shown great potential. Keep it up."
    } else if average >= 60.0 {
        "A good result. With more focus on your weak areas, you can do even better."
    } else if average >= 50.0 {
        "A fair performance. You need to put in more effort to reach your full potential."
    } else if average >= 40.0 {
        "Pass mark obtained. You are capable of much more; please study harder next term."
    } else {
        "Poor performance. You need to be far more serious with your studies. See me for counseling."
    }
}

/// Percentage to one decimal place; 0 when the school never opened.
pub fn attendance_percentage(times_present: i64, times_school_opened: i64) -> f64 {
    if times_school_opened <= 0 {
        return 0.0;
    }
    let pct = times_present as f64 / times_school_opened as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermTotal {
    pub subject_id: String,
    pub subject_name: String,
    pub term: Term,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeSubject {
    pub subject_id: String,
    pub subject_name: String,
    pub first: Option<i64>,
    pub second: Option<i64>,
    pub third: Option<i64>,
    pub subject_total: i64,
    pub subject_average: f64,
    pub grade: Grade,
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeSummary {
    pub subjects: Vec<CumulativeSubject>,
    pub total_score: i64,
    pub subject_count: usize,
    pub cumulative_average: f64,
    /// Never computed across the class; stays `None` and displays as "-".
    pub position: Option<u32>,
    pub position_display: String,
    pub promotion: Option<Promotion>,
}

/// Later rows for the same subject and term replace earlier ones.
pub fn cumulate<I>(rows: I, pass_mark: f64) -> CumulativeSummary
where
    I: IntoIterator<Item = TermTotal>,
{
    let mut by_subject: BTreeMap<(String, String), BTreeMap<Term, i64>> = BTreeMap::new();
    for row in rows {
        by_subject
            .entry((row.subject_name, row.subject_id))
            .or_default()
            .insert(row.term, row.total);
    }

    let mut subjects = Vec::with_capacity(by_subject.len());
    let mut total_score = 0_i64;
    for ((subject_name, subject_id), terms) in by_subject {
        let subject_total: i64 = terms.values().sum();
        let subject_average = safe_average(subject_total as f64, terms.len());
        let grade = Grade::for_score(subject_average);
        subjects.push(CumulativeSubject {
            subject_id,
            subject_name,
            first: terms.get(&Term::First).copied(),
            second: terms.get(&Term::Second).copied(),
            third: terms.get(&Term::Third).copied(),
            subject_total,
            subject_average,
            grade,
            remark: grade.remark().to_string(),
        });
        total_score += subject_total;
    }

    let subject_count = subjects.len();
    let cumulative_average = safe_average(total_score as f64, subject_count);
    let promotion = if subject_count > 0 {
        Some(Promotion::for_average(cumulative_average, pass_mark))
    } else {
        None
    };
    CumulativeSummary {
        subjects,
        total_score,
        subject_count,
        cumulative_average,
        position: None,
        position_display: ordinal(None),
        promotion,
    }
}

/// "1st", "2nd", "3rd", "4th", "11th", "21st"; unranked renders as "-".
pub fn ordinal(position: Option<u32>) -> String {
    let Some(n) = position else {
        return "-".to_string();
    };
    let suffix = if (11..=13).contains(&(n % 100)) {
        "th"
    } else {
        match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{}{}", n, suffix)
}

pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(ca: [i64; 4], tests: [i64; 2], exam: i64) -> ScoreSheet {
        ScoreSheet { ca, tests, exam }
    }

    #[test]
    fn grade_boundaries_follow_threshold_table() {
        let cases = [
            (100, Grade::A),
            (80, Grade::A),
            (79, Grade::B),
            (70, Grade::B),
            (69, Grade::C),
            (60, Grade::C),
            (59, Grade::D),
            (50, Grade::D),
            (49, Grade::E),
            (40, Grade::E),
            (39, Grade::F),
            (0, Grade::F),
        ];
        for (total, expected) in cases {
            assert_eq!(Grade::for_score(total as f64), expected, "total {}", total);
        }
        assert_eq!(Grade::E.remark(), "Fair");
        assert_eq!(Grade::B.remark(), "Very Good");
    }

    #[test]
    fn grade_is_defined_for_every_integer_total() {
        for t in 0..=100 {
            let g = Grade::for_score(t as f64);
            assert_eq!(Grade::from_letter(g.letter()), Some(g));
        }
    }

    #[test]
    fn legacy_tests_count_when_all_ca_marks_are_zero() {
        let s = sheet([0, 0, 0, 0], [10, 10], 30);
        assert_eq!(s.total(), 50);
        assert_eq!(s.grade(), Grade::D);
    }

    #[test]
    fn any_nonzero_ca_mark_ignores_legacy_tests() {
        let s = sheet([5, 0, 0, 0], [10, 10], 30);
        assert_eq!(s.effective_input(), ScoreInput::Continuous([5, 0, 0, 0]));
        assert_eq!(s.total(), 35);
        assert_eq!(s.grade(), Grade::F);
    }

    #[test]
    fn entry_only_overwrites_supplied_groups() {
        let mut s = sheet([0, 0, 0, 0], [12, 8], 40);
        let entry = ScoreEntry {
            inputs: vec![ScoreInput::Continuous([10, 10, 5, 5])],
            exam: None,
        };
        entry.apply_to(&mut s);
        assert_eq!(s.tests, [12, 8]);
        assert_eq!(s.exam, 40);
        assert_eq!(s.total(), 70);
    }

    #[test]
    fn validation_names_the_offending_field() {
        let entry = ScoreEntry {
            inputs: vec![ScoreInput::Continuous([10, 11, 0, 0])],
            exam: Some(60),
        };
        match entry.validate() {
            Err(EngineError::Validation { field, .. }) => assert_eq!(field, "ca2"),
            other => panic!("expected validation error, got {:?}", other),
        }

        let entry = ScoreEntry {
            inputs: vec![ScoreInput::LegacyTests([21, 0])],
            exam: None,
        };
        assert!(entry.validate().is_err());

        let entry = ScoreEntry {
            inputs: vec![],
            exam: Some(-1),
        };
        assert!(entry.validate().is_err());

        let entry = ScoreEntry {
            inputs: vec![
                ScoreInput::Continuous([10, 10, 10, 10]),
                ScoreInput::LegacyTests([20, 20]),
            ],
            exam: Some(60),
        };
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn term_parses_names_and_indexes() {
        assert_eq!("first".parse::<Term>().ok(), Some(Term::First));
        assert_eq!(" Second ".parse::<Term>().ok(), Some(Term::Second));
        assert_eq!("3".parse::<Term>().ok(), Some(Term::Third));
        assert_eq!(Term::from_index(2), Some(Term::Second));
        assert!("Fourth".parse::<Term>().is_err());
        assert_eq!(Term::from_index(0), None);
    }

    fn score(record: &str, student: &str, total: i64) -> SubjectScore {
        SubjectScore {
            record_id: record.to_string(),
            student_id: student.to_string(),
            total,
        }
    }

    #[test]
    fn subject_ties_share_position_and_skip() {
        let ranking = rank_subject(&[
            score("r3", "s3", 80),
            score("r1", "s1", 90),
            score("r2", "s2", 90),
        ]);
        assert_eq!(ranking.highest, 90);
        let got: Vec<(&str, u32)> = ranking
            .placements
            .iter()
            .map(|p| (p.student_id.as_str(), p.position))
            .collect();
        assert_eq!(got, vec![("s1", 1), ("s2", 1), ("s3", 3)]);
    }

    #[test]
    fn subject_ranking_of_nothing_is_empty() {
        let ranking = rank_subject(&[]);
        assert!(ranking.placements.is_empty());
        assert_eq!(ranking.highest, 0);
    }

    #[test]
    fn tie_order_is_by_student_id_regardless_of_input_order() {
        let a = rank_subject(&[score("x", "b", 50), score("y", "a", 50)]);
        let b = rank_subject(&[score("y", "a", 50), score("x", "b", 50)]);
        assert_eq!(a, b);
        assert_eq!(a.placements[0].student_id, "a");
    }

    #[test]
    fn class_ties_on_average_skip_positions() {
        let aggregates: Vec<TermAggregate> = [("a", 72.0), ("b", 72.0), ("c", 65.5), ("d", 50.0)]
            .iter()
            .map(|(id, avg)| TermAggregate {
                student_id: id.to_string(),
                total_score: 0,
                subject_count: 1,
                average: *avg,
            })
            .collect();
        let positions: Vec<u32> = rank_class(&aggregates).iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![1, 1, 3, 4]);
    }

    #[test]
    fn three_way_tie_then_next_is_fourth() {
        let ranked = competition_rank(vec![("a", 5), ("b", 5), ("c", 5), ("d", 4), ("e", 4), ("f", 1)]);
        let positions: Vec<u32> = ranked.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 1, 1, 4, 4, 6]);
    }

    #[test]
    fn aggregation_sums_and_averages_per_student() {
        let aggregates = aggregate_term(vec![("s1", 90), ("s2", 70), ("s1", 60)]);
        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].student_id, "s1");
        assert_eq!(aggregates[0].total_score, 150);
        assert_eq!(aggregates[0].subject_count, 2);
        assert_eq!(aggregates[0].average, 75.0);
        assert_eq!(aggregates[1].average, 70.0);
        assert!(aggregate_term(Vec::<(String, i64)>::new()).is_empty());
    }

    #[test]
    fn averages_of_nothing_are_zero() {
        assert_eq!(safe_average(0.0, 0), 0.0);
        assert_eq!(safe_average(10.0, 0), 0.0);
    }

    fn term_total(subject: &str, term: Term, total: i64) -> TermTotal {
        TermTotal {
            subject_id: format!("id-{}", subject),
            subject_name: subject.to_string(),
            term,
            total,
        }
    }

    #[test]
    fn cumulative_uses_present_terms_only() {
        let summary = cumulate(
            vec![
                term_total("Mathematics", Term::First, 70),
                term_total("Mathematics", Term::Second, 80),
            ],
            DEFAULT_PASS_MARK,
        );
        assert_eq!(summary.subject_count, 1);
        let math = &summary.subjects[0];
        assert_eq!(math.first, Some(70));
        assert_eq!(math.second, Some(80));
        assert_eq!(math.third, None);
        assert_eq!(math.subject_total, 150);
        assert_eq!(math.subject_average, 75.0);
        assert_eq!(math.grade, Grade::B);
        assert_eq!(summary.position, None);
        assert_eq!(summary.position_display, "-");
    }

    #[test]
    fn cumulative_average_is_total_over_subject_count() {
        let summary = cumulate(
            vec![
                term_total("English", Term::First, 60),
                term_total("Mathematics", Term::First, 70),
                term_total("Mathematics", Term::Second, 80),
            ],
            DEFAULT_PASS_MARK,
        );
        // (60 + 150) / 2, not the mean of per-subject averages (60 + 75) / 2.
        assert_eq!(summary.total_score, 210);
        assert_eq!(summary.cumulative_average, 105.0);
        assert_eq!(summary.subjects[0].subject_name, "English");
        assert_eq!(summary.promotion, Some(Promotion::Promoted));
    }

    #[test]
    fn cumulative_without_records_is_empty_and_unranked() {
        let summary = cumulate(Vec::new(), DEFAULT_PASS_MARK);
        assert_eq!(summary.subject_count, 0);
        assert_eq!(summary.cumulative_average, 0.0);
        assert_eq!(summary.promotion, None);
        assert_eq!(summary.position, None);
    }

    #[test]
    fn ordinals() {
        let got: Vec<String> = [1, 2, 3, 4, 11, 12, 13, 21, 22, 101, 111]
            .iter()
            .map(|n| ordinal(Some(*n)))
            .collect();
        assert_eq!(
            got,
            vec!["1st", "2nd", "3rd", "4th", "11th", "12th", "13th", "21st", "22nd", "101st", "111th"]
        );
        assert_eq!(ordinal(None), "-");
    }

    #[test]
    fn promotion_threshold_is_inclusive() {
        assert_eq!(Promotion::for_average(50.0, 50.0), Promotion::Promoted);
        assert_eq!(Promotion::for_average(49.99, 50.0), Promotion::Repeat);
        assert_eq!(round_2(66.666_666), 66.67);
    }

    #[test]
    fn auto_comment_bands_start_at_their_lower_edge() {
        assert!(auto_comment(80.0).starts_with("An excellent result"));
        assert!(auto_comment(79.99).starts_with("A very good performance"));
        assert!(auto_comment(70.0).starts_with("A very good performance"));
        assert!(auto_comment(60.0).starts_with("A good result"));
        assert!(auto_comment(59.5).starts_with("A fair performance"));
        assert!(auto_comment(50.0).starts_with("A fair performance"));
        assert!(auto_comment(40.0).starts_with("Pass mark obtained"));
        assert!(auto_comment(39.9).starts_with("Poor performance"));
        assert!(auto_comment(0.0).starts_with("Poor performance"));
    }

    #[test]
    fn attendance_percentage_rounds_to_one_place() {
        assert_eq!(attendance_percentage(45, 60), 75.0);
        assert_eq!(attendance_percentage(2, 3), 66.7);
        assert_eq!(attendance_percentage(118, 118), 100.0);
        assert_eq!(attendance_percentage(0, 90), 0.0);
        assert_eq!(attendance_percentage(12, 0), 0.0);
    }
}
