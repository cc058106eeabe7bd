//! Section diffing and association-set replacement
//!
//! Both are pure: they compute what to write and leave the writing to the
//! caller's transaction.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::{NewSection, Section, SectionKey};

/// Writes needed to bring one course's stored sections in line with upstream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionPlan {
    pub inserts: Vec<NewSection>,
    /// `(stored id, new values)`; the id is kept
    pub updates: Vec<(i64, NewSection)>,
    /// Matched rows whose values already agree
    pub unchanged: usize,
    /// Ids to delete, ascending
    pub deletes: Vec<i64>,
    /// Extra stored rows sharing one identity, included in `deletes`
    pub duplicates: usize,
    /// Upstream rows repeating an identity already seen in the payload
    pub skipped: usize,
}

impl SectionPlan {
    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Diff upstream rows against stored rows by `(num, start_time, days)`.
///
/// Stored rows are expected in id order; among stored duplicates the first
/// is kept.
pub fn plan_sections(course_id: &str, upstream: &[NewSection], stored: &[Section]) -> SectionPlan {
    let mut by_key: HashMap<SectionKey, Vec<&Section>> = HashMap::new();
    for section in stored {
        by_key.entry(section.key()).or_default().push(section);
    }

    let mut plan = SectionPlan::default();
    let mut retained: HashSet<SectionKey> = HashSet::with_capacity(upstream.len());

    for row in upstream {
        let key = row.key();
        if !retained.insert(key.clone()) {
            tracing::warn!(
                course_id,
                num = %row.num,
                days = row.days,
                "Upstream repeats a section identity, keeping the first"
            );
            plan.skipped += 1;
            continue;
        }

        let Some((keep, extra)) = by_key.get(&key).and_then(|m| m.split_first()) else {
            plan.inserts.push(row.clone());
            continue;
        };

        if !extra.is_empty() {
            tracing::warn!(
                course_id,
                num = %row.num,
                kept = keep.id,
                dropped = ?extra.iter().map(|s| s.id).collect::<Vec<_>>(),
                "Stored sections share one identity, deleting extras"
            );
            plan.duplicates += extra.len();
            plan.deletes.extend(extra.iter().map(|s| s.id));
        }

        if keep.matches(row) {
            plan.unchanged += 1;
        } else {
            plan.updates.push((keep.id, row.clone()));
        }
    }

    plan.deletes.extend(
        stored
            .iter()
            .filter(|s| !retained.contains(&s.key()))
            .map(|s| s.id),
    );
    plan.deletes.sort_unstable();
    plan.deletes.dedup();

    plan
}

/// Additions and removals turning a current set into a desired one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDelta<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T: Ord + Clone> SetDelta<T> {
    pub fn between(current: &BTreeSet<T>, desired: &BTreeSet<T>) -> Self {
        Self {
            added: desired.difference(current).cloned().collect(),
            removed: current.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
