//! Snapshot store abstraction
//!
//! The reconciler talks to the relational store only through these traits:
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │        Reconciler / Seat refresh          │
//! └───────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌───────────────────────────────────────────┐
//! │      SnapshotStore  ──begin()──▶ StoreTx   │
//! └───────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌───────────────────────────────────────────┐
//! │           SqliteSnapshotStore             │
//! └───────────────────────────────────────────┘
//! ```
//!
//! All writes for one course happen inside a single [`StoreTx`]. A
//! transaction that is dropped without [`StoreTx::commit`] rolls back.

pub mod sqlite;

use std::collections::BTreeSet;

use crate::encoding::Status;
use crate::error::Result;
use crate::models::{Course, Evaluation, Instructor, NewSection, Section, Term};

pub use sqlite::SqliteSnapshotStore;

/// What an upsert did to the stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Writes scoped to one transaction
pub trait StoreTx {
    /// Insert or overwrite every mutable attribute of a course
    fn upsert_course(&self, course: &Course) -> Result<UpsertOutcome>;

    fn sections_for_course(&self, course_id: &str) -> Result<Vec<Section>>;

    /// Insert a section; `None` when a row with the same identity exists
    fn insert_section(&self, course_id: &str, section: &NewSection) -> Result<Option<i64>>;

    /// Overwrite a section in place, keeping its id
    fn update_section(&self, id: i64, section: &NewSection) -> Result<()>;

    fn delete_sections(&self, ids: &[i64]) -> Result<usize>;

    /// Update seat counts; status is only touched when given.
    /// Returns whether anything changed.
    fn update_section_seats(
        &self,
        id: i64,
        tot: u32,
        cap: u32,
        status: Option<Status>,
    ) -> Result<bool>;

    /// Returns whether the stored status changed
    fn set_course_status(&self, course_id: &str, status: Status) -> Result<bool>;

    fn upsert_instructor(&self, instructor: &Instructor) -> Result<UpsertOutcome>;

    fn instructor_ids_for_course(&self, course_id: &str) -> Result<BTreeSet<String>>;

    fn link_instructors(&self, course_id: &str, netids: &[String]) -> Result<()>;

    fn unlink_instructors(&self, course_id: &str, netids: &[String]) -> Result<()>;

    fn department_codes_for_course(&self, course_id: &str) -> Result<BTreeSet<String>>;

    fn link_departments(&self, course_id: &str, codes: &[String]) -> Result<()>;

    fn unlink_departments(&self, course_id: &str, codes: &[String]) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;
}

/// Persisted snapshot of the registrar catalog
pub trait SnapshotStore: Send + Sync {
    /// Start a transaction; dropping it uncommitted rolls back
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>>;

    fn course(&self, course_id: &str) -> Result<Option<Course>>;

    fn courses_for_term(&self, term: Term) -> Result<Vec<Course>>;

    fn sections_for_term(&self, term: Term) -> Result<Vec<Section>>;

    fn instructor(&self, netid: &str) -> Result<Option<Instructor>>;

    fn instructors_for_course(&self, course_id: &str) -> Result<Vec<Instructor>>;

    fn departments_for_course(&self, course_id: &str) -> Result<BTreeSet<String>>;

    fn upsert_evaluation(&self, evaluation: &Evaluation) -> Result<UpsertOutcome>;

    fn evaluation_for_course(&self, course_id: &str) -> Result<Option<Evaluation>>;

    /// Set every instructor's rating to the mean rating of their evaluated
    /// courses. Returns the number of instructors with a rating.
    fn recompute_instructor_ratings(&self) -> Result<usize>;
}
