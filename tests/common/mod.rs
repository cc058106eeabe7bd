//! Common test utilities
//!
//! In-process fakes for the registrar and the evaluation portal, plus
//! builders for listing payloads.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use regsync::error::{Error, Result};
use regsync::evaluation::{EvaluationSource, ScrapedEvaluation};
use regsync::models::{CommentTally, Term};
use regsync::reconcile::{ReconcileOptions, Reconciler};
use regsync::storage::{SnapshotStore, SqliteSnapshotStore};
use regsync::upstream::{
    CourseDetails, CourseQuery, CourseSeats, Crosslisting, DetailInstructor, ListingClass,
    ListingCourse, ListingInstructor, ListingMeeting, RegListing, SeatsFetch, SubjectListing,
    TermInfo, UpstreamClient,
};
use regsync::utils::error::FetchError;

pub fn term() -> Term {
    "1252".parse().unwrap()
}

pub fn meeting(start: &str, end: &str, days: &[&str]) -> ListingMeeting {
    ListingMeeting {
        start_time: Some(start.to_string()),
        end_time: Some(end.to_string()),
        days: days.iter().map(|d| d.to_string()).collect(),
        building: Some("Friend Center".to_string()),
        room: Some("101".to_string()),
    }
}

pub fn class(
    number: &str,
    section: &str,
    status: &str,
    enrollment: u32,
    meetings: Vec<ListingMeeting>,
) -> ListingClass {
    ListingClass {
        class_number: number.to_string(),
        section: section.to_string(),
        status: Some(status.to_string()),
        capacity: 100,
        enrollment,
        meetings,
    }
}

pub fn listed_instructor(first: &str, last: &str) -> ListingInstructor {
    ListingInstructor {
        emplid: None,
        first_name: first.to_string(),
        last_name: last.to_string(),
        full_name: format!("{first} {last}"),
    }
}

pub fn course(listing_id: &str, catalog_number: &str, title: &str) -> ListingCourse {
    ListingCourse {
        listing_id: listing_id.to_string(),
        catalog_number: catalog_number.to_string(),
        title: title.to_string(),
        description: None,
        instructors: Vec::new(),
        crosslistings: Vec::new(),
        classes: Vec::new(),
    }
}

pub fn crosslisting(subject: &str, catalog_number: &str) -> Crosslisting {
    Crosslisting {
        subject: subject.to_string(),
        catalog_number: catalog_number.to_string(),
    }
}

pub fn details(instructors: &[(&str, &str)], dists: &[&str]) -> CourseDetails {
    CourseDetails {
        dists: dists.iter().map(|d| d.to_string()).collect(),
        instructors: instructors
            .iter()
            .map(|(netid, name)| DetailInstructor {
                netid: netid.to_string(),
                name: name.to_string(),
            })
            .collect(),
        ..CourseDetails::default()
    }
}

/// Registrar fake: per-department listings, per-course details and seats
#[derive(Default)]
pub struct FakeUpstream {
    pub terms: Mutex<Vec<TermInfo>>,
    pub departments: Mutex<HashMap<String, Vec<SubjectListing>>>,
    pub details: Mutex<HashMap<String, CourseDetails>>,
    pub failing_details: Mutex<HashSet<String>>,
    pub flaky_details: Mutex<HashSet<String>>,
    pub seats: Mutex<Vec<CourseSeats>>,
    pub failing_seats: Mutex<HashSet<String>>,
    pub reg_listings: Mutex<Vec<RegListing>>,
    pub detail_calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `courses` to the listing of `dept`
    pub fn list(&self, dept: &str, courses: Vec<ListingCourse>) {
        let mut departments = self.departments.lock().unwrap();
        let subjects = departments.entry(dept.to_string()).or_default();
        match subjects.iter_mut().find(|s| s.code == dept) {
            Some(subject) => subject.courses.extend(courses),
            None => subjects.push(SubjectListing {
                code: dept.to_string(),
                name: None,
                courses,
            }),
        }
    }

    pub fn set_details(&self, listing_id: &str, details: CourseDetails) {
        self.details
            .lock()
            .unwrap()
            .insert(listing_id.to_string(), details);
    }

    pub fn fail_details(&self, listing_id: &str) {
        self.failing_details
            .lock()
            .unwrap()
            .insert(listing_id.to_string());
    }

    /// Fail the next details request for `listing_id` only
    pub fn fail_details_once(&self, listing_id: &str) {
        self.flaky_details
            .lock()
            .unwrap()
            .insert(listing_id.to_string());
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn get_terms(&self) -> std::result::Result<Vec<TermInfo>, FetchError> {
        Ok(self.terms.lock().unwrap().clone())
    }

    async fn get_courses(
        &self,
        query: &CourseQuery,
    ) -> std::result::Result<Vec<SubjectListing>, FetchError> {
        let departments = self.departments.lock().unwrap();
        match &query.subject {
            Some(subject) => Ok(departments.get(subject).cloned().unwrap_or_default()),
            None => Ok(departments.values().flatten().cloned().collect()),
        }
    }

    async fn get_course_details(
        &self,
        listing_id: &str,
        _term: Term,
    ) -> std::result::Result<CourseDetails, FetchError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_details.lock().unwrap().contains(listing_id)
            || self.flaky_details.lock().unwrap().remove(listing_id)
        {
            return Err(FetchError::MaxRetriesExceeded("Server error: 503".to_string()));
        }
        Ok(self
            .details
            .lock()
            .unwrap()
            .get(listing_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_seats(
        &self,
        _term: Term,
        listing_ids: &[String],
    ) -> std::result::Result<SeatsFetch, FetchError> {
        let failing = self.failing_seats.lock().unwrap();
        let (failed, ok): (Vec<String>, Vec<String>) = listing_ids
            .iter()
            .cloned()
            .partition(|id| failing.contains(id));
        let seats = self
            .seats
            .lock()
            .unwrap()
            .iter()
            .filter(|s| ok.contains(&s.course_id))
            .cloned()
            .collect();
        Ok(SeatsFetch { seats, failed })
    }

    async fn get_reg_listings(&self, _term: Term) -> std::result::Result<Vec<RegListing>, FetchError> {
        Ok(self.reg_listings.lock().unwrap().clone())
    }
}

/// Evaluation portal fake keyed by listing id
#[derive(Default)]
pub struct FakeEvaluations {
    pub pages: Mutex<HashMap<String, ScrapedEvaluation>>,
    pub rejected: Mutex<bool>,
}

impl FakeEvaluations {
    pub fn rated(&self, listing_id: &str, eval_term: Term, rating: f64) {
        self.pages.lock().unwrap().insert(
            listing_id.to_string(),
            ScrapedEvaluation {
                eval_term,
                tally: CommentTally::Counted(1),
                comments: vec!["Worth taking".to_string()],
                rating: Some(rating),
                rating_source: Some("Quality of Lectures".to_string()),
            },
        );
    }
}

#[async_trait]
impl EvaluationSource for FakeEvaluations {
    async fn latest_evaluation(
        &self,
        listing_id: &str,
        _upto: Term,
    ) -> Result<Option<ScrapedEvaluation>> {
        if *self.rejected.lock().unwrap() {
            return Err(Error::Fetch(FetchError::Unauthorized(401)));
        }
        Ok(self.pages.lock().unwrap().get(listing_id).cloned())
    }
}

pub fn options(max_in_flight: usize) -> ReconcileOptions {
    ReconcileOptions {
        max_in_flight,
        stagger: std::time::Duration::ZERO,
        jitter: std::time::Duration::ZERO,
        departments: Vec::new(),
        use_reg_listings: true,
    }
}

pub fn reconciler(upstream: Arc<FakeUpstream>) -> (Reconciler, Arc<dyn SnapshotStore>) {
    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::in_memory().unwrap());
    let reconciler = Reconciler::new(upstream, Arc::clone(&store), options(3));
    (reconciler, store)
}
