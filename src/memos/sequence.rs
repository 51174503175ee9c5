//! Correlative number allocation.
//!
//! One counter row per (department, year, month). Allocation takes a
//! row-exclusive lock on that row for the read-increment-write only, so
//! concurrent submissions in the same department and month are serialized
//! while other keys proceed in parallel.

use std::fmt;
use std::time::Duration;

use chrono::{Datelike, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{WorkflowError, WorkflowResult};
use crate::models::{Department, NewSequenceCounter, SequenceCounter};
use crate::schema::{departments, sequence_counters};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelativeNumber {
    pub prefix: String,
    pub year: i32,
    pub month: u32,
    pub sequence: i32,
}

impl CorrelativeNumber {
    pub fn new(prefix: &str, year: i32, month: u32, sequence: i32) -> WorkflowResult<Self> {
        validate_month(month)?;
        Ok(Self {
            prefix: prefix.trim().to_string(),
            year,
            month,
            sequence,
        })
    }
}

impl fmt::Display for CorrelativeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:04}-{:02}-{:04}",
            self.prefix, self.year, self.month, self.sequence
        )
    }
}

fn validate_month(month: u32) -> WorkflowResult<()> {
    if (1..=12).contains(&month) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidMonth(month))
    }
}

/// Allocates the next correlative number for `department_id`.
///
/// `year` and `month` default to the current UTC date. When called inside an
/// enclosing transaction the counter lock is held until that transaction ends.
pub fn allocate(
    conn: &mut PgConnection,
    department_id: Uuid,
    year: Option<i32>,
    month: Option<u32>,
    lock_timeout: Duration,
) -> WorkflowResult<CorrelativeNumber> {
    let today = Utc::now().date_naive();
    let year = year.unwrap_or_else(|| today.year());
    let month = month.unwrap_or_else(|| today.month());
    validate_month(month)?;

    let department: Department = departments::table
        .find(department_id)
        .first::<Department>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound("department"))?;
    let prefix = department
        .configured_prefix()
        .ok_or(WorkflowError::InvalidDepartment)?
        .to_string();

    let month_key = month as i32;
    let sequence = conn
        .transaction::<i32, DieselError, _>(|conn| {
            diesel::sql_query(format!(
                "SET LOCAL lock_timeout = '{}ms'",
                lock_timeout.as_millis().max(1)
            ))
            .execute(conn)?;

            diesel::insert_into(sequence_counters::table)
                .values(&NewSequenceCounter {
                    department_id,
                    year,
                    month: month_key,
                    last_sequence: 0,
                    prefix: prefix.clone(),
                })
                .on_conflict_do_nothing()
                .execute(conn)?;

            let counter: SequenceCounter = sequence_counters::table
                .find((department_id, year, month_key))
                .for_update()
                .first(conn)?;

            let next = counter.last_sequence + 1;
            diesel::update(sequence_counters::table.find((department_id, year, month_key)))
                .set((
                    sequence_counters::last_sequence.eq(next),
                    sequence_counters::prefix.eq(&prefix),
                    sequence_counters::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
            Ok(next)
        })
        .map_err(classify_lock_error)?;

    debug!(
        department_id = %department_id,
        year,
        month,
        sequence,
        "allocated correlative sequence"
    );

    CorrelativeNumber::new(&prefix, year, month, sequence)
}

/// Lock timeouts and serialization conflicts surface as a retryable error
/// rather than a generic database failure.
fn classify_lock_error(err: DieselError) -> WorkflowError {
    let contended = match &err {
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => true,
        DieselError::DatabaseError(_, info) => is_lock_timeout(info.message()),
        _ => false,
    };
    if contended {
        warn!(error = %err, "sequence counter lock not acquired");
        WorkflowError::SequenceUnavailable
    } else {
        WorkflowError::Database(err)
    }
}

fn is_lock_timeout(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("lock timeout") || lowered.contains("could not obtain lock")
}
