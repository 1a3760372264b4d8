//! Unlock policy - pure derivation of exercise status from attempt records
//!
//! No I/O and no stored state: callers pass the ordered exercise ids and
//! the current attempt records, and get back derived status values.
//!
//! Per-exercise state machine: Locked -> Available (all predecessors
//! complete) -> InProgress (first failed attempt) -> Completed (passing
//! attempt) -> InProgress (later failing attempt reverts completion).
//! Locked is only re-entered by a full progress reset.

use std::collections::HashMap;
use std::fmt;

use crate::store::AttemptRecord;

/// Derived status of one exercise; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExerciseStatus {
    /// A predecessor has not been completed yet
    Locked,
    /// Unlocked, never attempted
    Available,
    /// Attempted but not currently passing
    InProgress,
    /// Most recent recorded state is a pass
    Completed,
}

impl fmt::Display for ExerciseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExerciseStatus::Locked => "locked",
            ExerciseStatus::Available => "available",
            ExerciseStatus::InProgress => "in progress",
            ExerciseStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Derived course-level progress; computed on demand, never persisted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CourseProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
}

fn is_completed(id: &str, records: &HashMap<String, AttemptRecord>) -> bool {
    // A missing record counts as not completed
    records.get(id).map(|r| r.completed).unwrap_or(false)
}

/// Whether the exercise at `index` is unlocked
///
/// The first exercise is always unlocked; any later exercise requires a
/// completed record for every exercise at a lower ordinal.
pub fn is_unlocked(index: usize, ordered_ids: &[String], records: &HashMap<String, AttemptRecord>) -> bool {
    if index == 0 {
        return true;
    }
    ordered_ids[..index.min(ordered_ids.len())]
        .iter()
        .all(|id| is_completed(id, records))
}

/// Derived status of the exercise at `index`
pub fn status_of(index: usize, ordered_ids: &[String], records: &HashMap<String, AttemptRecord>) -> ExerciseStatus {
    if !is_unlocked(index, ordered_ids, records) {
        return ExerciseStatus::Locked;
    }

    let Some(id) = ordered_ids.get(index) else {
        return ExerciseStatus::Locked;
    };

    match records.get(id) {
        None => ExerciseStatus::Available,
        Some(record) if record.completed => ExerciseStatus::Completed,
        Some(_) => ExerciseStatus::InProgress,
    }
}

/// Statuses for every exercise, in ordinal order
pub fn statuses(ordered_ids: &[String], records: &HashMap<String, AttemptRecord>) -> Vec<ExerciseStatus> {
    (0..ordered_ids.len())
        .map(|i| status_of(i, ordered_ids, records))
        .collect()
}

/// Completed/total/percentage across the course
pub fn course_progress(ordered_ids: &[String], records: &HashMap<String, AttemptRecord>) -> CourseProgress {
    let total = ordered_ids.len();
    let completed = ordered_ids.iter().filter(|id| is_completed(id, records)).count();
    let percent = if total == 0 {
        0.0
    } else {
        completed as f64 * 100.0 / total as f64
    };

    CourseProgress {
        completed,
        total,
        percent,
    }
}

/// Index attempt records by exercise id
pub fn index_records(records: Vec<AttemptRecord>) -> HashMap<String, AttemptRecord> {
    records.into_iter().map(|r| (r.exercise_id.clone(), r)).collect()
}
