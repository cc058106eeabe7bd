//! Raw upstream payload shapes
//!
//! The registrar feeds are inconsistent: a list with a single element is
//! sometimes sent as a bare object, numbers arrive as strings and optional
//! sections are `null` or missing. Everything is normalized here so the rest
//! of the crate only sees the clean domain types at the bottom of this file.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{normalize_dists, GradingCategory, GradingMap, Term};

// ============================================================================
// Deserialization helpers
// ============================================================================

/// A field that upstream sends either as one object or as an array of them
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// `deserialize_with` adapter: object, array or `null` → `Vec<T>`
pub fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<OneOrMany<T>> = Option::deserialize(deserializer)?;
    Ok(value.map(OneOrMany::into_vec).unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
}

/// Identifier sent as either a JSON string or a JSON number
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Str(s) => s.trim().to_string(),
    })
}

fn scalar_to_u32(value: Option<Scalar>) -> Result<u32, String> {
    match value {
        None => Ok(0),
        Some(Scalar::Int(n)) => u32::try_from(n).map_err(|_| format!("count out of range: {n}")),
        Some(Scalar::Float(f)) if f >= 0.0 && f <= f64::from(u32::MAX) => Ok(f.round() as u32),
        Some(Scalar::Float(f)) => Err(format!("count out of range: {f}")),
        Some(Scalar::Str(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(0)
            } else {
                s.parse::<u32>().map_err(|_| format!("not a count: {s:?}"))
            }
        }
    }
}

/// Count sent as a number, a numeric string, an empty string or `null`
pub fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Scalar> = Option::deserialize(deserializer)?;
    scalar_to_u32(value).map_err(de::Error::custom)
}

fn json_to_u32(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u32)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Terms
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct RawTermsResponse {
    #[serde(default, deserialize_with = "one_or_many")]
    term: Vec<RawTerm>,
}

#[derive(Debug, Deserialize)]
struct RawTerm {
    #[serde(deserialize_with = "string_or_number")]
    code: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cal_name: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

impl RawTermsResponse {
    pub(crate) fn into_terms(self) -> Vec<TermInfo> {
        self.term
            .into_iter()
            .filter_map(|raw| match raw.code.parse::<Term>() {
                Ok(term) => Some(TermInfo {
                    term,
                    name: non_blank(raw.name).unwrap_or_else(|| raw.code.clone()),
                    cal_name: non_blank(raw.cal_name),
                    start_date: non_blank(raw.start_date),
                    end_date: non_blank(raw.end_date),
                }),
                Err(e) => {
                    tracing::warn!(code = %raw.code, error = %e, "Skipping malformed term");
                    None
                }
            })
            .collect()
    }
}

// ============================================================================
// Department course listings
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct RawCoursesResponse {
    #[serde(default, deserialize_with = "one_or_many")]
    term: Vec<RawTermCourses>,
}

#[derive(Debug, Deserialize)]
struct RawTermCourses {
    #[serde(default, deserialize_with = "one_or_many")]
    subjects: Vec<RawSubject>,
}

#[derive(Debug, Deserialize)]
struct RawSubject {
    code: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    courses: Vec<RawCourse>,
}

#[derive(Debug, Deserialize)]
struct RawCourse {
    #[serde(deserialize_with = "string_or_number")]
    course_id: String,
    #[serde(default)]
    catalog_number: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: Option<RawCourseDetailSummary>,
    #[serde(default, deserialize_with = "one_or_many")]
    instructors: Vec<RawListingInstructor>,
    #[serde(default, deserialize_with = "one_or_many")]
    crosslistings: Vec<Crosslisting>,
    #[serde(default, deserialize_with = "one_or_many")]
    classes: Vec<RawClass>,
}

#[derive(Debug, Deserialize)]
struct RawCourseDetailSummary {
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawListingInstructor {
    #[serde(default)]
    emplid: Option<String>,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct RawClass {
    #[serde(deserialize_with = "string_or_number")]
    class_number: String,
    #[serde(default)]
    section: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    capacity: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    enrollment: u32,
    #[serde(default)]
    schedule: Option<RawSchedule>,
}

#[derive(Debug, Deserialize)]
struct RawSchedule {
    #[serde(default, deserialize_with = "one_or_many")]
    meetings: Vec<RawMeeting>,
}

#[derive(Debug, Deserialize)]
struct RawMeeting {
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    days: Vec<String>,
    #[serde(default)]
    building: Option<RawBuilding>,
    #[serde(default)]
    room: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBuilding {
    #[serde(default)]
    name: Option<String>,
}

impl RawCoursesResponse {
    pub(crate) fn into_subjects(self) -> Vec<SubjectListing> {
        self.term
            .into_iter()
            .flat_map(|term| term.subjects)
            .map(SubjectListing::from)
            .collect()
    }
}

impl From<RawSubject> for SubjectListing {
    fn from(raw: RawSubject) -> Self {
        Self {
            code: raw.code.trim().to_uppercase(),
            name: non_blank(raw.name),
            courses: raw.courses.into_iter().map(ListingCourse::from).collect(),
        }
    }
}

impl From<RawCourse> for ListingCourse {
    fn from(raw: RawCourse) -> Self {
        Self {
            listing_id: raw.course_id,
            catalog_number: raw.catalog_number.trim().to_string(),
            title: raw.title.trim().to_string(),
            description: non_blank(raw.detail.and_then(|d| d.description)),
            instructors: raw
                .instructors
                .into_iter()
                .map(|i| ListingInstructor {
                    emplid: non_blank(i.emplid),
                    first_name: i.first_name.trim().to_string(),
                    last_name: i.last_name.trim().to_string(),
                    full_name: i.full_name.trim().to_string(),
                })
                .collect(),
            crosslistings: raw.crosslistings,
            classes: raw.classes.into_iter().map(ListingClass::from).collect(),
        }
    }
}

impl From<RawClass> for ListingClass {
    fn from(raw: RawClass) -> Self {
        let meetings = raw
            .schedule
            .map(|s| s.meetings)
            .unwrap_or_default()
            .into_iter()
            .map(|m| ListingMeeting {
                start_time: non_blank(m.start_time),
                end_time: non_blank(m.end_time),
                days: m.days,
                building: non_blank(m.building.and_then(|b| b.name)),
                room: non_blank(m.room),
            })
            .collect();

        Self {
            class_number: raw.class_number,
            section: raw.section.trim().to_string(),
            status: non_blank(raw.status),
            capacity: raw.capacity,
            enrollment: raw.enrollment,
            meetings,
        }
    }
}

// ============================================================================
// Course details
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct RawDetailsResponse {
    course_details: RawDetailsWrapper,
}

#[derive(Debug, Deserialize)]
struct RawDetailsWrapper {
    #[serde(default, deserialize_with = "one_or_many")]
    course_detail: Vec<RawCourseDetail>,
}

#[derive(Debug, Deserialize)]
struct RawCourseDetail {
    #[serde(default)]
    crosslistings: Option<String>,
    #[serde(default)]
    grading_basis: Option<String>,
    #[serde(default)]
    distribution_area_short: Option<String>,
    #[serde(default)]
    course_instructors: Option<RawCourseInstructors>,
    #[serde(default)]
    course_head_name: Option<String>,
    #[serde(default)]
    course_head_netid: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawCourseInstructors {
    #[serde(default, deserialize_with = "one_or_many")]
    course_instructor: Vec<RawDetailInstructor>,
}

#[derive(Debug, Deserialize)]
struct RawDetailInstructor {
    #[serde(default)]
    netid: Option<String>,
    #[serde(default)]
    emplid: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
}

impl RawDetailsResponse {
    /// First detail record, or `None` when upstream sent an empty envelope
    pub(crate) fn into_details(self) -> Option<CourseDetails> {
        self.course_details
            .course_detail
            .into_iter()
            .next()
            .map(CourseDetails::from)
    }
}

fn grading_from_fields(extra: &HashMap<String, serde_json::Value>) -> GradingMap {
    extra
        .iter()
        .filter_map(|(field, value)| {
            let category = GradingCategory::from_field(field)?;
            let weight = json_to_u32(value)?;
            (weight > 0).then_some((category, weight))
        })
        .collect()
}

impl From<RawCourseDetail> for CourseDetails {
    fn from(raw: RawCourseDetail) -> Self {
        let instructors = raw
            .course_instructors
            .map(|c| c.course_instructor)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|i| {
                let emplid = i.emplid.as_ref().and_then(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
                let netid = non_blank(i.netid).or_else(|| non_blank(emplid))?;
                let name = non_blank(i.name)?;
                Some(DetailInstructor { netid, name })
            })
            .collect();

        let course_head = match (
            non_blank(raw.course_head_netid),
            non_blank(raw.course_head_name),
        ) {
            (Some(netid), Some(name)) => Some(DetailInstructor { netid, name }),
            _ => None,
        };

        let has_final = raw
            .extra
            .get("grading_final_exam")
            .and_then(json_to_u32)
            .map(|weight| weight > 0);

        Self {
            crosslistings: non_blank(raw.crosslistings),
            grading_basis: non_blank(raw.grading_basis),
            dists: raw
                .distribution_area_short
                .as_deref()
                .map(normalize_dists)
                .unwrap_or_default(),
            grading: grading_from_fields(&raw.extra),
            has_final,
            instructors,
            course_head,
        }
    }
}

// ============================================================================
// Seats
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct RawSeatsResponse {
    #[serde(default, deserialize_with = "one_or_many")]
    course: Vec<RawCourseSeats>,
}

#[derive(Debug, Deserialize)]
struct RawCourseSeats {
    #[serde(deserialize_with = "string_or_number")]
    course_id: String,
    #[serde(default, deserialize_with = "one_or_many")]
    classes: Vec<RawClassSeats>,
}

#[derive(Debug, Deserialize)]
struct RawClassSeats {
    #[serde(deserialize_with = "string_or_number")]
    class_number: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    capacity: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    enrollment: u32,
    #[serde(default)]
    pu_calc_status: Option<String>,
}

impl RawSeatsResponse {
    pub(crate) fn into_seats(self) -> Vec<CourseSeats> {
        self.course
            .into_iter()
            .map(|c| CourseSeats {
                course_id: c.course_id,
                classes: c
                    .classes
                    .into_iter()
                    .map(|s| ClassSeats {
                        class_number: s.class_number,
                        capacity: s.capacity,
                        enrollment: s.enrollment,
                        status: non_blank(s.pu_calc_status),
                    })
                    .collect(),
            })
            .collect()
    }
}

// ============================================================================
// Public registrar listings
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct RawRegListingsResponse {
    #[serde(default)]
    classes: Option<RawRegClasses>,
}

#[derive(Debug, Deserialize)]
struct RawRegClasses {
    #[serde(default, deserialize_with = "one_or_many")]
    class: Vec<RawRegClass>,
}

#[derive(Debug, Deserialize)]
struct RawRegClass {
    #[serde(deserialize_with = "string_or_number")]
    course_id: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    catnum: String,
    #[serde(default)]
    crosslistings: Option<String>,
    #[serde(default)]
    distribution_area: Option<String>,
}

impl RawRegListingsResponse {
    pub(crate) fn into_listings(self) -> Vec<RegListing> {
        self.classes
            .map(|c| c.class)
            .unwrap_or_default()
            .into_iter()
            .map(|raw| RegListing {
                listing_id: raw.course_id,
                subject: raw.subject.trim().to_uppercase(),
                catnum: raw.catnum.trim().to_string(),
                crosslistings: non_blank(raw.crosslistings),
                dists: raw
                    .distribution_area
                    .as_deref()
                    .map(normalize_dists)
                    .unwrap_or_default(),
            })
            .collect()
    }
}

// ============================================================================
// Domain types handed to the rest of the crate
// ============================================================================

/// One academic term advertised by upstream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermInfo {
    pub term: Term,
    pub name: String,
    pub cal_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Courses listed under one subject (department)
#[derive(Debug, Clone)]
pub struct SubjectListing {
    pub code: String,
    pub name: Option<String>,
    pub courses: Vec<ListingCourse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Crosslisting {
    pub subject: String,
    pub catalog_number: String,
}

#[derive(Debug, Clone)]
pub struct ListingCourse {
    pub listing_id: String,
    pub catalog_number: String,
    pub title: String,
    pub description: Option<String>,
    pub instructors: Vec<ListingInstructor>,
    pub crosslistings: Vec<Crosslisting>,
    pub classes: Vec<ListingClass>,
}

#[derive(Debug, Clone)]
pub struct ListingInstructor {
    pub emplid: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

#[derive(Debug, Clone)]
pub struct ListingClass {
    pub class_number: String,
    pub section: String,
    pub status: Option<String>,
    pub capacity: u32,
    pub enrollment: u32,
    pub meetings: Vec<ListingMeeting>,
}

#[derive(Debug, Clone)]
pub struct ListingMeeting {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub days: Vec<String>,
    pub building: Option<String>,
    pub room: Option<String>,
}

/// Course details feed: identity of instructors plus grading information
#[derive(Debug, Clone, Default)]
pub struct CourseDetails {
    pub crosslistings: Option<String>,
    pub grading_basis: Option<String>,
    pub dists: Vec<String>,
    pub grading: GradingMap,
    pub has_final: Option<bool>,
    pub instructors: Vec<DetailInstructor>,
    pub course_head: Option<DetailInstructor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailInstructor {
    pub netid: String,
    pub name: String,
}

/// Seat counts for every class of one course
#[derive(Debug, Clone)]
pub struct CourseSeats {
    pub course_id: String,
    pub classes: Vec<ClassSeats>,
}

#[derive(Debug, Clone)]
pub struct ClassSeats {
    pub class_number: String,
    pub capacity: u32,
    pub enrollment: u32,
    pub status: Option<String>,
}

/// Seat counts gathered across batches.
///
/// `failed` holds the course ids of batches that could not be fetched.
#[derive(Debug, Clone, Default)]
pub struct SeatsFetch {
    pub seats: Vec<CourseSeats>,
    pub failed: Vec<String>,
}

/// Row of the public registrar listings
#[derive(Debug, Clone)]
pub struct RegListing {
    pub listing_id: String,
    pub subject: String,
    pub catnum: String,
    pub crosslistings: Option<String>,
    pub dists: Vec<String>,
}
