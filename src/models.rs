// Core data structures for the registrar snapshot

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::encoding::{time_key, Status};
use crate::utils::error::ParseError;

/// Academic term code (e.g. "1252"), ordered chronologically by numeric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Term(u16);

impl Term {
    pub fn code(&self) -> u16 {
        self.0
    }
}

impl FromStr for Term {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidTerm(s.to_string()));
        }
        s.parse::<u16>()
            .map(Term)
            .map_err(|_| ParseError::InvalidTerm(s.to_string()))
    }
}

impl TryFrom<String> for Term {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Term> for String {
    fn from(term: Term) -> Self {
        term.to_string()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Storage primary key of a course: `{listing_id}-{term}`
pub fn course_row_id(listing_id: &str, term: Term) -> String {
    format!("{listing_id}-{term}")
}

/// Grading components reported by the course details feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingCategory {
    MidtermExam,
    FinalExam,
    TakeHomeMidterm,
    TakeHomeFinal,
    OtherExam,
    Quizzes,
    ProblemSets,
    LabReports,
    ProgrammingAssignments,
    DesignProject,
    MidtermPaper,
    FinalPaper,
    TermPapers,
    OtherPapers,
    Presentation,
    Participation,
    Other,
}

impl GradingCategory {
    /// Map an upstream `grading_*` field name to its category
    pub fn from_field(field: &str) -> Option<Self> {
        let category = match field.strip_prefix("grading_")? {
            "mid_exam" => Self::MidtermExam,
            "final_exam" => Self::FinalExam,
            "home_mid_exam" => Self::TakeHomeMidterm,
            "home_final_exam" => Self::TakeHomeFinal,
            "other_exam" => Self::OtherExam,
            "quizzes" => Self::Quizzes,
            "prob_sets" => Self::ProblemSets,
            "lab_reports" => Self::LabReports,
            "prog_assign" => Self::ProgrammingAssignments,
            "design_projects" => Self::DesignProject,
            "papers_mid_term" => Self::MidtermPaper,
            "papers_final" => Self::FinalPaper,
            "term_papers" => Self::TermPapers,
            "other_papers" => Self::OtherPapers,
            "oral_pres" => Self::Presentation,
            "precept_part" => Self::Participation,
            "other" => Self::Other,
            _ => return None,
        };
        Some(category)
    }
}

/// Percentage weight per grading category; only non-zero entries are kept
pub type GradingMap = BTreeMap<GradingCategory, u32>;

/// Course row of the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub listing_id: String,
    pub term: Term,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    pub dists: Vec<String>,
    pub grading_basis: Option<String>,
    pub has_final: Option<bool>,
    pub grading: GradingMap,
}

/// Identity of a section within its course
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionKey {
    pub num: String,
    pub start: i32,
    pub days: u8,
}

/// A section row as shaped from upstream, before it has a storage identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSection {
    pub title: String,
    pub num: String,
    pub room: Option<String>,
    pub tot: u32,
    pub cap: u32,
    pub days: u8,
    pub start_time: f64,
    pub end_time: f64,
    pub status: Status,
}

impl NewSection {
    pub fn key(&self) -> SectionKey {
        SectionKey {
            num: self.num.clone(),
            start: time_key(self.start_time),
            days: self.days,
        }
    }
}

/// Persisted section row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: i64,
    pub course_id: String,
    #[serde(flatten)]
    pub data: NewSection,
}

impl Section {
    pub fn key(&self) -> SectionKey {
        self.data.key()
    }

    /// True when every mutable attribute already equals `upstream`
    pub fn matches(&self, upstream: &NewSection) -> bool {
        let current = &self.data;
        current.title == upstream.title
            && current.room == upstream.room
            && current.tot == upstream.tot
            && current.cap == upstream.cap
            && time_key(current.end_time) == time_key(upstream.end_time)
            && current.status == upstream.status
    }
}

/// Instructor keyed by netid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instructor {
    pub netid: String,
    pub name: String,
    pub full_name: String,
    pub department: Option<String>,
    pub email: Option<String>,
    pub office: Option<String>,
    pub rating: Option<f64>,
    pub num_ratings: u32,
}

impl Instructor {
    pub fn new(netid: impl Into<String>, name: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            netid: netid.into(),
            name: name.into(),
            full_name: full_name.into(),
            department: None,
            email: None,
            office: None,
            rating: None,
            num_ratings: 0,
        }
    }
}

/// Comment count of an evaluation.
///
/// `NoData` (the page carried no comment region) is kept apart from `Empty`
/// (the region was there with nothing in it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "count", rename_all = "snake_case")]
pub enum CommentTally {
    NoData,
    Empty,
    Counted(u32),
}

impl CommentTally {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => Self::Empty,
            n => Self::Counted(n as u32),
        }
    }

    /// Column form: `NULL` / `0` / `n`
    pub fn as_column(&self) -> Option<u32> {
        match self {
            Self::NoData => None,
            Self::Empty => Some(0),
            Self::Counted(n) => Some(*n),
        }
    }

    pub fn from_column(value: Option<u32>) -> Self {
        match value {
            None => Self::NoData,
            Some(n) => Self::from_count(n as usize),
        }
    }
}

/// Evaluation attached to a course, drawn from `eval_term`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub course_id: String,
    pub eval_term: Term,
    pub tally: CommentTally,
    pub comments: Vec<String>,
    pub rating: Option<f64>,
    pub rating_source: Option<String>,
}

/// Sorted, de-duplicated distribution tags from strings like "EC or CD"
pub fn normalize_dists(raw: &str) -> Vec<String> {
    static SEPARATOR_RE: OnceLock<Regex> = OnceLock::new();
    let separator = SEPARATOR_RE.get_or_init(|| {
        Regex::new(r"(?i)\s+or\s+|[,/;]|\s+").expect("Invalid regex pattern")
    });

    separator
        .split(raw)
        .map(|tag| tag.trim().to_uppercase())
        .filter(|tag| !tag.is_empty() && tag != "OR")
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Department codes of every cross-listed component of a course code.
///
/// `"COS126 / EGR126"` yields `{"COS", "EGR"}`; components without a leading
/// three-letter code are dropped.
pub fn department_codes(code: &str) -> BTreeSet<String> {
    static DEPT_RE: OnceLock<Regex> = OnceLock::new();
    let dept = DEPT_RE.get_or_init(|| Regex::new(r"^([A-Z]{3})").expect("Invalid regex pattern"));

    code.split('/')
        .filter_map(|component| {
            dept.captures(component.trim())
                .map(|caps| caps[1].to_string())
        })
        .collect()
}
