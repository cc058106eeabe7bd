//! Shape one upstream course into snapshot rows
//!
//! Pure functions: the listing and details payloads go in, a [`CourseRecord`]
//! with the course row, its section rows, the resolved instructors and the
//! derived departments comes out.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::encoding::{days_to_value, derive_course_status, time_key, time_to_value, Status, NULL_TIME};
use crate::models::{course_row_id, department_codes, Course, Instructor, NewSection, Term};
use crate::utils::error::EncodingError;
use crate::utils::name_key;

use super::dto::{CourseDetails, ListingClass, ListingCourse, ListingInstructor};

/// Everything the reconciler writes for one course
#[derive(Debug, Clone)]
pub struct CourseRecord {
    pub course: Course,
    pub sections: Vec<NewSection>,
    pub instructors: Vec<Instructor>,
    pub departments: BTreeSet<String>,
    /// Listing instructors with no identity in the details feed
    pub unresolved_instructors: usize,
}

/// Cross-listed code, listing subject first: `"COS126 / EGR126"`
pub fn course_code(subject: &str, course: &ListingCourse) -> String {
    let primary = std::iter::once((subject, course.catalog_number.as_str()));
    let crosslisted = course
        .crosslistings
        .iter()
        .map(|c| (c.subject.as_str(), c.catalog_number.as_str()));

    let mut seen = HashSet::new();
    primary
        .chain(crosslisted)
        .map(|(subject, number)| {
            format!("{}{}", subject.trim().to_uppercase(), number.trim())
        })
        .filter(|code| seen.insert(code.clone()))
        .collect::<Vec<_>>()
        .join(" / ")
}

fn room_label(building: Option<&str>, room: Option<&str>) -> Option<String> {
    match (building, room) {
        (Some(building), Some(room)) => Some(format!("{building} {room}")),
        (Some(building), None) => Some(building.to_string()),
        (None, Some(room)) => Some(room.to_string()),
        (None, None) => None,
    }
}

/// Section rows for one class: one per distinct `(start, days)` meeting
pub fn class_sections(class: &ListingClass) -> Result<Vec<NewSection>, EncodingError> {
    let status = Status::from_upstream(class.status.as_deref());
    let row = |days: u8, start_time: f64, end_time: f64, room: Option<String>| NewSection {
        title: class.section.clone(),
        num: class.class_number.clone(),
        room,
        tot: class.enrollment,
        cap: class.capacity,
        days,
        start_time,
        end_time,
        status,
    };

    if class.meetings.is_empty() {
        return Ok(vec![row(0, NULL_TIME, NULL_TIME, None)]);
    }

    let mut seen = HashSet::new();
    let mut sections = Vec::with_capacity(class.meetings.len());
    for meeting in &class.meetings {
        let days = days_to_value(&meeting.days)?;
        let start = time_to_value(meeting.start_time.as_deref())?;
        let end = time_to_value(meeting.end_time.as_deref())?;

        if !seen.insert((time_key(start), days)) {
            continue;
        }

        let room = room_label(meeting.building.as_deref(), meeting.room.as_deref());
        sections.push(row(days, start, end, room));
    }

    Ok(sections)
}

/// Join listing instructors to their identities in the details feed.
///
/// Returns the resolved instructors and the number dropped for lack of a
/// match. The course head is always appended.
pub fn resolve_instructors(
    listing_id: &str,
    listing: &[ListingInstructor],
    details: &CourseDetails,
) -> (Vec<Instructor>, usize) {
    let by_name: HashMap<String, _> = details
        .instructors
        .iter()
        .map(|d| (name_key(&d.name), d))
        .collect();

    let mut resolved: Vec<Instructor> = Vec::new();
    let mut missed = 0;

    for person in listing {
        let Some(identity) = by_name.get(&name_key(&person.full_name)) else {
            missed += 1;
            continue;
        };

        if resolved.iter().any(|i| i.netid == identity.netid) {
            continue;
        }

        let short_name = format!("{} {}", person.first_name, person.last_name);
        let short_name = match short_name.trim() {
            "" => person.full_name.clone(),
            name => name.to_string(),
        };
        resolved.push(Instructor::new(&identity.netid, short_name, &person.full_name));
    }

    if missed > 0 {
        let listed: Vec<&str> = listing.iter().map(|p| p.full_name.as_str()).collect();
        let known: Vec<&str> = details.instructors.iter().map(|d| d.name.as_str()).collect();
        tracing::warn!(
            course_id = %listing_id,
            missed,
            listed = ?listed,
            known = ?known,
            "Dropping instructors without a netid match"
        );
    }

    if let Some(head) = &details.course_head {
        if !resolved.iter().any(|i| i.netid == head.netid) {
            resolved.push(Instructor::new(&head.netid, &head.name, &head.name));
        }
    }

    (resolved, missed)
}

/// Build the full record for one listed course.
///
/// Any malformed meeting fails the whole course so its stored rows stay as
/// they were.
pub fn build_course_record(
    term: Term,
    subject: &str,
    listing: &ListingCourse,
    details: &CourseDetails,
    fallback_dists: &[String],
) -> Result<CourseRecord, EncodingError> {
    let mut sections = Vec::new();
    for class in &listing.classes {
        sections.extend(class_sections(class)?);
    }

    let (instructors, unresolved_instructors) =
        resolve_instructors(&listing.listing_id, &listing.instructors, details);

    let code = course_code(subject, listing);
    let departments = department_codes(&code);

    let dists = if details.dists.is_empty() {
        fallback_dists.to_vec()
    } else {
        details.dists.clone()
    };

    let status = derive_course_status(sections.iter().map(|s| (s.title.as_str(), s.status)));

    let course = Course {
        id: course_row_id(&listing.listing_id, term),
        listing_id: listing.listing_id.clone(),
        term,
        code,
        title: listing.title.clone(),
        description: listing.description.clone(),
        status,
        dists,
        grading_basis: details.grading_basis.clone(),
        has_final: details.has_final,
        grading: details.grading.clone(),
    };

    Ok(CourseRecord {
        course,
        sections,
        instructors,
        departments,
        unresolved_instructors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::dto::{Crosslisting, DetailInstructor, ListingMeeting};

    fn meeting(start: &str, end: &str, days: &[&str]) -> ListingMeeting {
        ListingMeeting {
            start_time: Some(start.to_string()),
            end_time: Some(end.to_string()),
            days: days.iter().map(|d| d.to_string()).collect(),
            building: Some("Friend Center".to_string()),
            room: Some("101".to_string()),
        }
    }

    fn class(num: &str, section: &str, status: &str, meetings: Vec<ListingMeeting>) -> ListingClass {
        ListingClass {
            class_number: num.to_string(),
            section: section.to_string(),
            status: Some(status.to_string()),
            capacity: 40,
            enrollment: 12,
            meetings,
        }
    }

    fn listing_instructor(first: &str, last: &str) -> ListingInstructor {
        ListingInstructor {
            emplid: None,
            first_name: first.to_string(),
            last_name: last.to_string(),
            full_name: format!("{first} {last}"),
        }
    }

    fn sample_course() -> ListingCourse {
        ListingCourse {
            listing_id: "002051".to_string(),
            catalog_number: "126".to_string(),
            title: "Computer Science: An Interdisciplinary Approach".to_string(),
            description: None,
            instructors: vec![listing_instructor("Robert", "Sedgewick")],
            crosslistings: vec![
                Crosslisting {
                    subject: "EGR".to_string(),
                    catalog_number: "126".to_string(),
                },
                Crosslisting {
                    subject: "COS".to_string(),
                    catalog_number: "126".to_string(),
                },
            ],
            classes: vec![
                class("40001", "L01", "Open", vec![meeting("11:00 AM", "12:20 PM", &["T", "Th"])]),
                class("40002", "P01", "Closed", vec![meeting("7:30 PM", "8:20 PM", &["W"])]),
            ],
        }
    }

    fn sample_details() -> CourseDetails {
        CourseDetails {
            dists: vec!["QCR".to_string()],
            instructors: vec![DetailInstructor {
                netid: "rs".to_string(),
                name: " robert  SEDGEWICK ".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_course_code_listing_subject_first() {
        let code = course_code("COS", &sample_course());
        assert_eq!(code, "COS126 / EGR126");
    }

    #[test]
    fn test_record_departments_and_status() {
        let term: Term = "1252".parse().unwrap();
        let record =
            build_course_record(term, "COS", &sample_course(), &sample_details(), &[]).unwrap();

        assert_eq!(record.course.id, "002051-1252");
        assert_eq!(
            record.departments.iter().cloned().collect::<Vec<_>>(),
            vec!["COS", "EGR"]
        );
        assert_eq!(record.sections.len(), 2);
        // Lecture open, precept category closed
        assert_eq!(record.course.status, Status::Closed);
        assert_eq!(record.sections[0].room.as_deref(), Some("Friend Center 101"));
    }

    #[test]
    fn test_class_without_meetings_gets_unscheduled_row() {
        let c = class("40003", "S01", "Open", Vec::new());
        let rows = class_sections(&c).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].days, 0);
        assert_eq!(rows[0].start_time, NULL_TIME);
        assert!(rows[0].room.is_none());
    }

    #[test]
    fn test_same_class_two_patterns_two_rows() {
        let c = class(
            "40004",
            "L01",
            "Open",
            vec![
                meeting("10:00 AM", "10:50 AM", &["M", "W"]),
                meeting("10:00 AM", "10:50 AM", &["M", "W"]),
                meeting("1:30 PM", "2:20 PM", &["F"]),
            ],
        );
        let rows = class_sections(&c).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.num == "40004"));
    }

    #[test]
    fn test_malformed_time_fails_course() {
        let mut course = sample_course();
        course.classes[0].meetings[0].start_time = Some("25:99".to_string());
        let term: Term = "1252".parse().unwrap();
        assert!(build_course_record(term, "COS", &course, &sample_details(), &[]).is_err());
    }

    #[test]
    fn test_unmatched_instructor_dropped() {
        let listing = vec![
            listing_instructor("Robert", "Sedgewick"),
            listing_instructor("Ada", "Lovelace"),
        ];
        let (resolved, missed) = resolve_instructors("002051", &listing, &sample_details());
        assert_eq!(missed, 1);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].netid, "rs");
        assert_eq!(resolved[0].name, "Robert Sedgewick");
    }

    #[test]
    fn test_course_head_appended_once() {
        let mut details = sample_details();
        details.course_head = Some(DetailInstructor {
            netid: "rs".to_string(),
            name: "Robert Sedgewick".to_string(),
        });
        let listing = vec![listing_instructor("Robert", "Sedgewick")];
        let (resolved, _) = resolve_instructors("002051", &listing, &details);
        assert_eq!(resolved.len(), 1);

        details.course_head = Some(DetailInstructor {
            netid: "kwayne".to_string(),
            name: "Kevin Wayne".to_string(),
        });
        let (resolved, _) = resolve_instructors("002051", &listing, &details);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].netid, "kwayne");
    }

    #[test]
    fn test_dists_fallback() {
        let mut details = sample_details();
        details.dists.clear();
        let term: Term = "1252".parse().unwrap();
        let fallback = vec!["SEN".to_string()];
        let record = build_course_record(term, "COS", &sample_course(), &details, &fallback).unwrap();
        assert_eq!(record.course.dists, vec!["SEN"]);
    }
}
