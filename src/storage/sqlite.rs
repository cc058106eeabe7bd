//! SQLite implementation of the snapshot store
//!
//! One connection behind a `Mutex`. A transaction holds the lock for its
//! whole lifetime, so writes for different courses are serialized.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef};
use rusqlite::{ffi, params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;

use super::{SnapshotStore, StoreTx, UpsertOutcome};
use crate::encoding::{time_key, Status};
use crate::error::{Error, Result};
use crate::models::{CommentTally, Course, Evaluation, Instructor, NewSection, Section, Term};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS courses (
        id TEXT PRIMARY KEY,
        listing_id TEXT NOT NULL,
        term TEXT NOT NULL,
        code TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL,
        dists TEXT NOT NULL DEFAULT '[]',
        grading_basis TEXT,
        has_final INTEGER,
        grading TEXT NOT NULL DEFAULT '{}',
        updated_at TEXT NOT NULL,
        UNIQUE (listing_id, term)
    );

    CREATE INDEX IF NOT EXISTS idx_courses_term ON courses(term);

    CREATE TABLE IF NOT EXISTS sections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        num TEXT NOT NULL,
        room TEXT,
        tot INTEGER NOT NULL,
        cap INTEGER NOT NULL,
        days INTEGER NOT NULL,
        start_time REAL NOT NULL,
        end_time REAL NOT NULL,
        start_key INTEGER NOT NULL,
        status TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_sections_identity
        ON sections(course_id, num, start_key, days);

    CREATE TABLE IF NOT EXISTS instructors (
        netid TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        full_name TEXT NOT NULL,
        department TEXT,
        email TEXT,
        office TEXT,
        rating REAL,
        num_ratings INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS course_instructor_map (
        course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
        netid TEXT NOT NULL REFERENCES instructors(netid) ON DELETE CASCADE,
        PRIMARY KEY (course_id, netid)
    );

    CREATE TABLE IF NOT EXISTS course_department_map (
        course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
        dept_code TEXT NOT NULL,
        PRIMARY KEY (course_id, dept_code)
    );

    CREATE TABLE IF NOT EXISTS evaluations (
        course_id TEXT PRIMARY KEY REFERENCES courses(id) ON DELETE CASCADE,
        eval_term TEXT NOT NULL,
        num_comments INTEGER,
        comments TEXT NOT NULL DEFAULT '[]',
        rating REAL,
        rating_source TEXT,
        scraped_at TEXT NOT NULL
    );
"#;

const COURSE_COLUMNS: &str =
    "id, listing_id, term, code, title, description, status, dists, grading_basis, has_final, grading";

const SECTION_COLUMNS: &str =
    "s.id, s.course_id, s.title, s.num, s.room, s.tot, s.cap, s.days, s.start_time, s.end_time, s.status";

const INSTRUCTOR_COLUMNS: &str =
    "i.netid, i.name, i.full_name, i.department, i.email, i.office, i.rating, i.num_ratings";

// ============================================================================
// Column conversions
// ============================================================================

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(format!("unknown status {e:?}").into()))
    }
}

impl ToSql for Term {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Term {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_course(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        term: row.get(2)?,
        code: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
        dists: json_column(row, 7)?,
        grading_basis: row.get(8)?,
        has_final: row.get(9)?,
        grading: json_column(row, 10)?,
    })
}

fn row_to_section(row: &Row<'_>) -> rusqlite::Result<Section> {
    Ok(Section {
        id: row.get(0)?,
        course_id: row.get(1)?,
        data: NewSection {
            title: row.get(2)?,
            num: row.get(3)?,
            room: row.get(4)?,
            tot: row.get(5)?,
            cap: row.get(6)?,
            days: row.get(7)?,
            start_time: row.get(8)?,
            end_time: row.get(9)?,
            status: row.get(10)?,
        },
    })
}

fn row_to_instructor(row: &Row<'_>) -> rusqlite::Result<Instructor> {
    Ok(Instructor {
        netid: row.get(0)?,
        name: row.get(1)?,
        full_name: row.get(2)?,
        department: row.get(3)?,
        email: row.get(4)?,
        office: row.get(5)?,
        rating: row.get(6)?,
        num_ratings: row.get(7)?,
    })
}

fn row_to_evaluation(row: &Row<'_>) -> rusqlite::Result<Evaluation> {
    Ok(Evaluation {
        course_id: row.get(0)?,
        eval_term: row.get(1)?,
        tally: CommentTally::from_column(row.get(2)?),
        comments: json_column(row, 3)?,
        rating: row.get(4)?,
        rating_source: row.get(5)?,
    })
}

fn is_identity_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn find_course(conn: &Connection, course_id: &str) -> Result<Option<Course>> {
    let course = conn
        .query_row(
            &format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?1"),
            params![course_id],
            row_to_course,
        )
        .optional()?;
    Ok(course)
}

fn find_instructor(conn: &Connection, netid: &str) -> Result<Option<Instructor>> {
    let instructor = conn
        .query_row(
            &format!("SELECT {INSTRUCTOR_COLUMNS} FROM instructors i WHERE i.netid = ?1"),
            params![netid],
            row_to_instructor,
        )
        .optional()?;
    Ok(instructor)
}

// ============================================================================
// Store
// ============================================================================

/// SQLite-backed [`SnapshotStore`]
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "Snapshot store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::LockPoisoned("snapshot store"))
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTx {
            conn,
            finished: false,
        }))
    }

    fn course(&self, course_id: &str) -> Result<Option<Course>> {
        let conn = self.lock()?;
        find_course(&conn, course_id)
    }

    fn courses_for_term(&self, term: Term) -> Result<Vec<Course>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE term = ?1 ORDER BY id"
        ))?;
        let courses = stmt
            .query_map(params![term], row_to_course)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(courses)
    }

    fn sections_for_term(&self, term: Term) -> Result<Vec<Section>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SECTION_COLUMNS} FROM sections s
             JOIN courses c ON c.id = s.course_id
             WHERE c.term = ?1
             ORDER BY s.course_id, s.id"
        ))?;
        let sections = stmt
            .query_map(params![term], row_to_section)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sections)
    }

    fn instructor(&self, netid: &str) -> Result<Option<Instructor>> {
        let conn = self.lock()?;
        find_instructor(&conn, netid)
    }

    fn instructors_for_course(&self, course_id: &str) -> Result<Vec<Instructor>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSTRUCTOR_COLUMNS} FROM instructors i
             JOIN course_instructor_map m ON m.netid = i.netid
             WHERE m.course_id = ?1
             ORDER BY i.netid"
        ))?;
        let instructors = stmt
            .query_map(params![course_id], row_to_instructor)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(instructors)
    }

    fn departments_for_course(&self, course_id: &str) -> Result<BTreeSet<String>> {
        let conn = self.lock()?;
        department_codes(&conn, course_id)
    }

    fn upsert_evaluation(&self, evaluation: &Evaluation) -> Result<UpsertOutcome> {
        let conn = self.lock()?;

        let existing = conn
            .query_row(
                "SELECT course_id, eval_term, num_comments, comments, rating, rating_source
                 FROM evaluations WHERE course_id = ?1",
                params![evaluation.course_id],
                row_to_evaluation,
            )
            .optional()?;

        let outcome = match existing {
            Some(current) if current == *evaluation => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };

        conn.execute(
            r#"
                INSERT INTO evaluations
                    (course_id, eval_term, num_comments, comments, rating, rating_source, scraped_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(course_id) DO UPDATE SET
                    eval_term = excluded.eval_term,
                    num_comments = excluded.num_comments,
                    comments = excluded.comments,
                    rating = excluded.rating,
                    rating_source = excluded.rating_source,
                    scraped_at = excluded.scraped_at
                "#,
            params![
                evaluation.course_id,
                evaluation.eval_term,
                evaluation.tally.as_column(),
                serde_json::to_string(&evaluation.comments)?,
                evaluation.rating,
                evaluation.rating_source,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(outcome)
    }

    fn evaluation_for_course(&self, course_id: &str) -> Result<Option<Evaluation>> {
        let conn = self.lock()?;
        let evaluation = conn
            .query_row(
                "SELECT course_id, eval_term, num_comments, comments, rating, rating_source
                 FROM evaluations WHERE course_id = ?1",
                params![course_id],
                row_to_evaluation,
            )
            .optional()?;
        Ok(evaluation)
    }

    fn recompute_instructor_ratings(&self) -> Result<usize> {
        let conn = self.lock()?;

        conn.execute(
            r#"
                UPDATE instructors SET
                    rating = (
                        SELECT ROUND(AVG(e.rating), 2)
                        FROM course_instructor_map m
                        JOIN evaluations e ON e.course_id = m.course_id
                        WHERE m.netid = instructors.netid AND e.rating IS NOT NULL
                    ),
                    num_ratings = (
                        SELECT COUNT(e.rating)
                        FROM course_instructor_map m
                        JOIN evaluations e ON e.course_id = m.course_id
                        WHERE m.netid = instructors.netid
                    )
                "#,
            [],
        )?;

        let rated: i64 = conn.query_row(
            "SELECT COUNT(*) FROM instructors WHERE rating IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(rated as usize)
    }
}

fn department_codes(conn: &Connection, course_id: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT dept_code FROM course_department_map WHERE course_id = ?1",
    )?;
    let codes = stmt
        .query_map(params![course_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(codes)
}

// ============================================================================
// Transaction
// ============================================================================

struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "Rollback failed");
            }
        }
    }
}

impl StoreTx for SqliteTx<'_> {
    fn upsert_course(&self, course: &Course) -> Result<UpsertOutcome> {
        let existing = find_course(&self.conn, &course.id)?;

        let (sql, outcome) = match existing {
            Some(current) if current == *course => return Ok(UpsertOutcome::Unchanged),
            Some(_) => (
                r#"
                UPDATE courses SET
                    listing_id = ?2, term = ?3, code = ?4, title = ?5, description = ?6,
                    status = ?7, dists = ?8, grading_basis = ?9, has_final = ?10,
                    grading = ?11, updated_at = ?12
                WHERE id = ?1
                "#,
                UpsertOutcome::Updated,
            ),
            None => (
                r#"
                INSERT INTO courses
                    (id, listing_id, term, code, title, description, status, dists,
                     grading_basis, has_final, grading, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                UpsertOutcome::Inserted,
            ),
        };

        self.conn.execute(
            sql,
            params![
                course.id,
                course.listing_id,
                course.term,
                course.code,
                course.title,
                course.description,
                course.status,
                serde_json::to_string(&course.dists)?,
                course.grading_basis,
                course.has_final,
                serde_json::to_string(&course.grading)?,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(outcome)
    }

    fn sections_for_course(&self, course_id: &str) -> Result<Vec<Section>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {SECTION_COLUMNS} FROM sections s WHERE s.course_id = ?1 ORDER BY s.id"
        ))?;
        let sections = stmt
            .query_map(params![course_id], row_to_section)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sections)
    }

    fn insert_section(&self, course_id: &str, section: &NewSection) -> Result<Option<i64>> {
        let result = self.conn.execute(
            r#"
                INSERT INTO sections
                    (course_id, title, num, room, tot, cap, days, start_time, end_time, start_key, status)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            params![
                course_id,
                section.title,
                section.num,
                section.room,
                section.tot,
                section.cap,
                section.days,
                section.start_time,
                section.end_time,
                time_key(section.start_time),
                section.status,
            ],
        );

        match result {
            Ok(_) => Ok(Some(self.conn.last_insert_rowid())),
            Err(e) if is_identity_conflict(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn update_section(&self, id: i64, section: &NewSection) -> Result<()> {
        self.conn.execute(
            r#"
                UPDATE sections SET
                    title = ?2, num = ?3, room = ?4, tot = ?5, cap = ?6, days = ?7,
                    start_time = ?8, end_time = ?9, start_key = ?10, status = ?11
                WHERE id = ?1
                "#,
            params![
                id,
                section.title,
                section.num,
                section.room,
                section.tot,
                section.cap,
                section.days,
                section.start_time,
                section.end_time,
                time_key(section.start_time),
                section.status,
            ],
        )?;
        Ok(())
    }

    fn delete_sections(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let deleted = self.conn.execute(
            &format!("DELETE FROM sections WHERE id IN ({placeholders})"),
            params_from_iter(ids.iter()),
        )?;
        Ok(deleted)
    }

    fn update_section_seats(
        &self,
        id: i64,
        tot: u32,
        cap: u32,
        status: Option<Status>,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            r#"
                UPDATE sections SET
                    tot = ?2, cap = ?3, status = COALESCE(?4, status)
                WHERE id = ?1
                  AND (tot != ?2 OR cap != ?3 OR (?4 IS NOT NULL AND status != ?4))
                "#,
            params![id, tot, cap, status],
        )?;
        Ok(changed > 0)
    }

    fn set_course_status(&self, course_id: &str, status: Status) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE courses SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status != ?2",
            params![course_id, status, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    fn upsert_instructor(&self, instructor: &Instructor) -> Result<UpsertOutcome> {
        let outcome = match find_instructor(&self.conn, &instructor.netid)? {
            None => UpsertOutcome::Inserted,
            Some(current) => {
                let keeps = |new: &Option<String>, old: &Option<String>| new.is_none() || new == old;
                if current.name == instructor.name
                    && current.full_name == instructor.full_name
                    && keeps(&instructor.department, &current.department)
                    && keeps(&instructor.email, &current.email)
                    && keeps(&instructor.office, &current.office)
                {
                    return Ok(UpsertOutcome::Unchanged);
                }
                UpsertOutcome::Updated
            }
        };

        self.conn.execute(
            r#"
                INSERT INTO instructors (netid, name, full_name, department, email, office)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(netid) DO UPDATE SET
                    name = excluded.name,
                    full_name = excluded.full_name,
                    department = COALESCE(excluded.department, department),
                    email = COALESCE(excluded.email, email),
                    office = COALESCE(excluded.office, office)
                "#,
            params![
                instructor.netid,
                instructor.name,
                instructor.full_name,
                instructor.department,
                instructor.email,
                instructor.office,
            ],
        )?;

        Ok(outcome)
    }

    fn instructor_ids_for_course(&self, course_id: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT netid FROM course_instructor_map WHERE course_id = ?1")?;
        let ids = stmt
            .query_map(params![course_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(ids)
    }

    fn link_instructors(&self, course_id: &str, netids: &[String]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO course_instructor_map (course_id, netid) VALUES (?1, ?2)",
        )?;
        for netid in netids {
            stmt.execute(params![course_id, netid])?;
        }
        Ok(())
    }

    fn unlink_instructors(&self, course_id: &str, netids: &[String]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "DELETE FROM course_instructor_map WHERE course_id = ?1 AND netid = ?2",
        )?;
        for netid in netids {
            stmt.execute(params![course_id, netid])?;
        }
        Ok(())
    }

    fn department_codes_for_course(&self, course_id: &str) -> Result<BTreeSet<String>> {
        department_codes(&self.conn, course_id)
    }

    fn link_departments(&self, course_id: &str, codes: &[String]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO course_department_map (course_id, dept_code) VALUES (?1, ?2)",
        )?;
        for code in codes {
            stmt.execute(params![course_id, code])?;
        }
        Ok(())
    }

    fn unlink_departments(&self, course_id: &str, codes: &[String]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "DELETE FROM course_department_map WHERE course_id = ?1 AND dept_code = ?2",
        )?;
        for code in codes {
            stmt.execute(params![course_id, code])?;
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}
