//! Reconciliation of upstream registrar data with the stored snapshot
//!
//! # Flow
//!
//! ```text
//! departments ──▶ get_courses(subject) ──▶ details (bounded pool)
//!                                               │
//!                                               ▼
//!                      build_course_record ──▶ apply_course (one transaction)
//! ```
//!
//! Failures are isolated: a course that cannot be fetched, shaped or written
//! is logged and counted, and the pass moves on.

pub mod diff;

use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::encoding::{derive_course_status, Status};
use crate::error::{Error, RegsyncErrorTrait, Result};
use crate::evaluation::EvaluationSource;
use crate::models::{Course, Section, Term};
use crate::storage::{SnapshotStore, UpsertOutcome};
use crate::upstream::{
    build_course_record, ClassSeats, CourseDetails, CourseQuery, CourseRecord, CourseSeats,
    ListingCourse, RegListing, UpstreamClient,
};
use crate::utils::error::FetchError;
use crate::utils::format_elapsed;

pub use diff::{plan_sections, SectionPlan, SetDelta};

// ============================================================================
// Counters
// ============================================================================

/// Per-entity write counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl EntityCounts {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn merge(&mut self, other: &EntityCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

impl fmt::Display for EntityCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted {}, updated {}, unchanged {}, deleted {}, skipped {}, errors {}",
            self.inserted, self.updated, self.unchanged, self.deleted, self.skipped, self.errors
        )
    }
}

/// Operator-facing summary of one pass over a term
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub term: Term,
    pub courses: EntityCounts,
    pub sections: EntityCounts,
    pub instructors: EntityCounts,
    pub evaluations: EntityCounts,
    pub departments_ok: usize,
    pub departments_failed: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(term: Term) -> Self {
        Self {
            term,
            courses: EntityCounts::default(),
            sections: EntityCounts::default(),
            instructors: EntityCounts::default(),
            evaluations: EntityCounts::default(),
            departments_ok: 0,
            departments_failed: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn absorb(&mut self, outcome: &CourseOutcome) {
        self.courses.record(outcome.course);
        self.sections.merge(&outcome.sections);
        self.instructors.merge(&outcome.instructors);
    }

    pub fn merge(&mut self, other: &RunSummary) {
        self.courses.merge(&other.courses);
        self.sections.merge(&other.sections);
        self.instructors.merge(&other.instructors);
        self.evaluations.merge(&other.evaluations);
        self.departments_ok += other.departments_ok;
        self.departments_failed += other.departments_failed;
    }

    /// Total per-entity failures
    pub fn errors(&self) -> usize {
        self.courses.errors + self.sections.errors + self.instructors.errors + self.evaluations.errors
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Term {} finished in {}", self.term, format_elapsed(self.elapsed))?;
        writeln!(
            f,
            "  departments: {} ok, {} failed",
            self.departments_ok, self.departments_failed
        )?;
        writeln!(f, "  courses:     {}", self.courses)?;
        writeln!(f, "  sections:    {}", self.sections)?;
        writeln!(f, "  instructors: {}", self.instructors)?;
        write!(f, "  evaluations: {}", self.evaluations)
    }
}

/// Writes made for one course
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseOutcome {
    pub course: UpsertOutcome,
    pub sections: EntityCounts,
    pub instructors: EntityCounts,
}

// ============================================================================
// Transactional apply
// ============================================================================

/// Write one course, its sections and its associations in one transaction
pub fn apply_course(store: &dyn SnapshotStore, record: &CourseRecord) -> Result<CourseOutcome> {
    let course_id = record.course.id.as_str();
    let tx = store.begin()?;

    let course = tx.upsert_course(&record.course)?;

    let stored = tx.sections_for_course(course_id)?;
    let plan = plan_sections(course_id, &record.sections, &stored);

    let mut sections = EntityCounts {
        unchanged: plan.unchanged,
        skipped: plan.skipped,
        ..EntityCounts::default()
    };

    sections.deleted = tx.delete_sections(&plan.deletes)?;

    for (id, row) in &plan.updates {
        tx.update_section(*id, row)?;
        sections.updated += 1;
    }

    for row in &plan.inserts {
        match tx.insert_section(course_id, row)? {
            Some(_) => sections.inserted += 1,
            None => {
                tracing::warn!(course_id, num = %row.num, "Section identity already stored, skipping insert");
                sections.skipped += 1;
            }
        }
    }

    let mut instructors = EntityCounts {
        skipped: record.unresolved_instructors,
        ..EntityCounts::default()
    };
    for instructor in &record.instructors {
        instructors.record(tx.upsert_instructor(instructor)?);
    }

    let desired: BTreeSet<String> = record.instructors.iter().map(|i| i.netid.clone()).collect();
    let delta = SetDelta::between(&tx.instructor_ids_for_course(course_id)?, &desired);
    tx.unlink_instructors(course_id, &delta.removed)?;
    tx.link_instructors(course_id, &delta.added)?;

    let delta = SetDelta::between(&tx.department_codes_for_course(course_id)?, &record.departments);
    tx.unlink_departments(course_id, &delta.removed)?;
    tx.link_departments(course_id, &delta.added)?;

    tx.commit()?;

    Ok(CourseOutcome {
        course,
        sections,
        instructors,
    })
}

/// Apply seat counts to a course's stored sections and recompute its status.
///
/// Returns the section counters and whether the course status changed.
pub fn apply_seats(
    store: &dyn SnapshotStore,
    course: &Course,
    sections: &[Section],
    seats: &CourseSeats,
) -> Result<(EntityCounts, bool)> {
    let by_class: HashMap<&str, &ClassSeats> = seats
        .classes
        .iter()
        .map(|c| (c.class_number.as_str(), c))
        .collect();

    let tx = store.begin()?;
    let mut counts = EntityCounts::default();
    let mut statuses: Vec<(&str, Status)> = Vec::with_capacity(sections.len());

    for section in sections {
        let mut status = section.data.status;

        match by_class.get(section.data.num.as_str()) {
            Some(class) => {
                let fresh = class
                    .status
                    .as_deref()
                    .map(|s| Status::from_upstream(Some(s)));
                if tx.update_section_seats(section.id, class.enrollment, class.capacity, fresh)? {
                    counts.updated += 1;
                } else {
                    counts.unchanged += 1;
                }
                status = fresh.unwrap_or(status);
            }
            None => counts.skipped += 1,
        }

        statuses.push((section.data.title.as_str(), status));
    }

    let changed = tx.set_course_status(&course.id, derive_course_status(statuses))?;
    tx.commit()?;

    Ok((counts, changed))
}

// ============================================================================
// Reconciler
// ============================================================================

/// Fan-out and department selection settings
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub max_in_flight: usize,
    pub stagger: Duration,
    pub jitter: Duration,
    pub departments: Vec<String>,
    pub use_reg_listings: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for ReconcileOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight.max(1),
            stagger: Duration::from_millis(config.stagger_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            departments: config.departments.clone(),
            use_reg_listings: config.use_reg_listings,
        }
    }
}

/// Drives a reconciliation pass for one term
pub struct Reconciler {
    upstream: Arc<dyn UpstreamClient>,
    store: Arc<dyn SnapshotStore>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        store: Arc<dyn SnapshotStore>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            upstream,
            store,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Reconcile every department of a term
    pub async fn reconcile_term(&self, term: Term) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new(term);

        let listings = self.reg_listings(term).await;
        let fallback_dists: HashMap<String, Vec<String>> = listings
            .iter()
            .filter(|l| !l.dists.is_empty())
            .map(|l| (l.listing_id.clone(), l.dists.clone()))
            .collect();

        let departments = self.departments(term, &listings).await?;
        tracing::info!(%term, departments = departments.len(), "Reconciling term");

        let mut seen: HashSet<String> = HashSet::new();
        for (index, dept) in departments.iter().enumerate() {
            match self
                .reconcile_department(term, dept, &fallback_dists, &mut seen)
                .await
            {
                Ok(dept_summary) => {
                    summary.merge(&dept_summary);
                    summary.departments_ok += 1;
                    tracing::info!(
                        %term,
                        dept = %dept,
                        progress = %format!("{}/{}", index + 1, departments.len()),
                        courses = dept_summary.courses.inserted
                            + dept_summary.courses.updated
                            + dept_summary.courses.unchanged,
                        errors = dept_summary.errors(),
                        elapsed = %format_elapsed(started.elapsed()),
                        "Department reconciled"
                    );
                }
                Err(e) => {
                    summary.departments_failed += 1;
                    tracing::warn!(
                        %term,
                        dept = %dept,
                        category = e.category().as_str(),
                        recoverable = e.is_recoverable(),
                        error = %e,
                        "Department failed"
                    );
                }
            }
        }

        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    async fn reg_listings(&self, term: Term) -> Vec<RegListing> {
        if !self.options.use_reg_listings {
            return Vec::new();
        }

        match self.upstream.get_reg_listings(term).await {
            Ok(listings) => listings,
            Err(e) => {
                tracing::warn!(%term, error = %e, "Registrar listings unavailable, continuing without them");
                Vec::new()
            }
        }
    }

    /// Departments to walk: configured list, else listing subjects, else
    /// every subject the course API reports
    async fn departments(&self, term: Term, listings: &[RegListing]) -> Result<Vec<String>> {
        if !self.options.departments.is_empty() {
            return Ok(self
                .options
                .departments
                .iter()
                .map(|d| d.trim().to_uppercase())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect());
        }

        let from_listings: BTreeSet<String> = listings
            .iter()
            .map(|l| l.subject.clone())
            .filter(|s| !s.is_empty())
            .collect();
        if !from_listings.is_empty() {
            return Ok(from_listings.into_iter().collect());
        }

        let subjects = self
            .upstream
            .get_courses(&CourseQuery::for_term(term))
            .await?;
        Ok(subjects
            .into_iter()
            .map(|s| s.code)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Reconcile every course listed under one department.
    ///
    /// Courses already in `seen` (cross-listed under an earlier department)
    /// are skipped. A course enters `seen` once its details were fetched, so
    /// a failed fetch is retried under the next department listing it.
    pub async fn reconcile_department(
        &self,
        term: Term,
        dept: &str,
        fallback_dists: &HashMap<String, Vec<String>>,
        seen: &mut HashSet<String>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::new(term);

        let subjects = self
            .upstream
            .get_courses(&CourseQuery::for_term(term).subject(dept))
            .await?;

        let Some(subject) = subjects.into_iter().find(|s| s.code == dept) else {
            tracing::info!(%term, dept, "No courses listed for department");
            return Ok(summary);
        };

        let listed = subject.courses.len();
        let mut queued = HashSet::new();
        let courses: Vec<ListingCourse> = subject
            .courses
            .into_iter()
            .filter(|c| !seen.contains(&c.listing_id) && queued.insert(c.listing_id.clone()))
            .collect();
        if courses.len() < listed {
            tracing::debug!(
                dept,
                skipped = listed - courses.len(),
                "Skipping courses already reconciled under another department"
            );
        }

        for (course, details) in self.fetch_details(term, courses).await {
            let details = match details {
                Ok(details) => {
                    seen.insert(course.listing_id.clone());
                    details
                }
                Err(e) => {
                    tracing::warn!(
                        course_id = %course.listing_id,
                        %term,
                        error = %e,
                        "Failed to fetch course details"
                    );
                    summary.courses.errors += 1;
                    continue;
                }
            };

            let fallback = fallback_dists
                .get(&course.listing_id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let record = match build_course_record(term, &subject.code, &course, &details, fallback)
                .map_err(Error::from)
            {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(
                        course_id = %course.listing_id,
                        %term,
                        title = %course.title,
                        classes = course.classes.len(),
                        category = e.category().as_str(),
                        error = %e,
                        "Malformed course payload, keeping stored rows"
                    );
                    summary.courses.errors += 1;
                    continue;
                }
            };

            match apply_course(self.store.as_ref(), &record) {
                Ok(outcome) => summary.absorb(&outcome),
                Err(e) => {
                    tracing::warn!(
                        course_id = %record.course.id,
                        %term,
                        code = %record.course.code,
                        sections = record.sections.len(),
                        error = %e,
                        "Course transaction rolled back"
                    );
                    summary.courses.errors += 1;
                }
            }
        }

        Ok(summary)
    }

    fn start_delay(&self, index: usize) -> Duration {
        let slot = (index % self.options.max_in_flight.max(1)) as u32;
        let jitter_ms = self.options.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.options.stagger * slot + jitter
    }

    /// Fetch details for many courses with at most `max_in_flight` requests
    /// outstanding and staggered starts
    async fn fetch_details(
        &self,
        term: Term,
        courses: Vec<ListingCourse>,
    ) -> Vec<(ListingCourse, std::result::Result<CourseDetails, FetchError>)> {
        stream::iter(courses.into_iter().enumerate())
            .map(|(index, course)| {
                let upstream = Arc::clone(&self.upstream);
                let delay = self.start_delay(index);
                async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let details = upstream.get_course_details(&course.listing_id, term).await;
                    (course, details)
                }
            })
            .buffer_unordered(self.options.max_in_flight.max(1))
            .collect()
            .await
    }

    /// Refresh seat counts and statuses for every stored course of a term
    pub async fn refresh_seats(&self, term: Term) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new(term);

        let courses = self.store.courses_for_term(term)?;
        if courses.is_empty() {
            tracing::info!(%term, "No stored courses to refresh");
            return Ok(summary);
        }

        let mut sections_by_course: HashMap<String, Vec<Section>> = HashMap::new();
        for section in self.store.sections_for_term(term)? {
            sections_by_course
                .entry(section.course_id.clone())
                .or_default()
                .push(section);
        }

        let listing_ids: Vec<String> = courses.iter().map(|c| c.listing_id.clone()).collect();
        let fetch = self.upstream.get_seats(term, &listing_ids).await?;
        let failed: HashSet<String> = fetch.failed.into_iter().collect();
        let seats: HashMap<String, CourseSeats> = fetch
            .seats
            .into_iter()
            .map(|s| (s.course_id.clone(), s))
            .collect();

        for course in &courses {
            if failed.contains(&course.listing_id) {
                summary.courses.errors += 1;
                continue;
            }
            let Some(course_seats) = seats.get(&course.listing_id) else {
                summary.courses.skipped += 1;
                continue;
            };

            let sections = sections_by_course
                .get(&course.id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            match apply_seats(self.store.as_ref(), course, sections, course_seats) {
                Ok((counts, status_changed)) => {
                    summary.sections.merge(&counts);
                    if status_changed {
                        summary.courses.updated += 1;
                    } else {
                        summary.courses.unchanged += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(course_id = %course.id, %term, error = %e, "Seat update rolled back");
                    summary.courses.errors += 1;
                }
            }
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            %term,
            courses = courses.len(),
            sections_updated = summary.sections.updated,
            failed = failed.len(),
            elapsed = %format_elapsed(summary.elapsed),
            "Seat refresh complete"
        );
        Ok(summary)
    }
}

/// Scrape evaluations for every stored course of a term, then recompute
/// instructor ratings.
///
/// A rejected session cookie aborts the pass.
pub async fn reconcile_evaluations(
    store: &dyn SnapshotStore,
    source: &dyn EvaluationSource,
    term: Term,
    batch_size: usize,
    batch_delay: Duration,
) -> Result<RunSummary> {
    let started = Instant::now();
    let mut summary = RunSummary::new(term);

    let courses = store.courses_for_term(term)?;
    let batches: Vec<&[Course]> = courses.chunks(batch_size.max(1)).collect();

    for (index, batch) in batches.iter().enumerate() {
        if index > 0 && !batch_delay.is_zero() {
            tokio::time::sleep(batch_delay).await;
        }

        let results = futures::future::join_all(
            batch
                .iter()
                .map(|course| source.latest_evaluation(&course.listing_id, term)),
        )
        .await;

        for (course, result) in batch.iter().zip(results) {
            match result {
                Ok(Some(scraped)) => {
                    let evaluation = scraped.into_evaluation(&course.id);
                    match store.upsert_evaluation(&evaluation) {
                        Ok(outcome) => summary.evaluations.record(outcome),
                        Err(e) => {
                            tracing::warn!(course_id = %course.id, error = %e, "Failed to store evaluation");
                            summary.evaluations.errors += 1;
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!(course_id = %course.id, "No evaluation data");
                    summary.evaluations.skipped += 1;
                }
                Err(Error::Fetch(FetchError::Unauthorized(status))) => {
                    return Err(Error::config(format!(
                        "evaluation portal rejected the session cookie (status {status})"
                    )));
                }
                Err(e) => {
                    tracing::warn!(
                        course_id = %course.id,
                        %term,
                        category = e.category().as_str(),
                        error = %e,
                        "Evaluation scrape failed"
                    );
                    summary.evaluations.errors += 1;
                }
            }
        }

        tracing::info!(
            %term,
            progress = %format!("{}/{}", index + 1, batches.len()),
            elapsed = %format_elapsed(started.elapsed()),
            "Evaluation batch complete"
        );
    }

    let rated = store.recompute_instructor_ratings()?;
    tracing::info!(rated, "Instructor ratings recomputed");

    summary.elapsed = started.elapsed();
    Ok(summary)
}
