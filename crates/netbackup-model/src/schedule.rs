// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cadence expressions ("schedules") and the `next` operation.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use netbackup_error::{ErrorCode, NetbackupError};

/// A compiled, seven-field, second-resolution cadence expression.
///
/// Cheap to clone: the compiled state is immutable and shared via `Arc`,
/// satisfying the "deep-copyable" requirement for schedules shared across
/// many (device, job) bindings.
#[derive(Clone, Debug)]
pub struct Schedule {
    expression: String,
    compiled: Arc<cron::Schedule>,
}

impl Schedule {
    /// Compile a cadence expression. Failure to compile is a configuration
    /// error raised at catalog-build time, never at dispatch time.
    pub fn compile(expression: &str) -> Result<Self, NetbackupError> {
        let compiled = cron::Schedule::from_str(expression).map_err(|e| {
            NetbackupError::new(ErrorCode::InvalidCron, format!("invalid cadence expression: {e}"))
                .with_context("expression", expression)
        })?;
        Ok(Self {
            expression: expression.to_string(),
            compiled: Arc::new(compiled),
        })
    }

    /// The original cadence expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the strictly smallest firing instant greater than `after`,
    /// or `None` if the cadence has no further occurrences.
    pub fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.compiled.after(&after).next()
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn compiles_seven_field_expression() {
        let sched = Schedule::compile("*/3 * * * * * *").expect("compiles");
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = sched.next(start).expect("has next firing");
        assert!(next > start);
        assert_eq!(next.timestamp() % 3, 0);
    }

    #[test]
    fn rejects_invalid_expression() {
        let err = Schedule::compile("not a cron expr").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCron);
    }

    #[test]
    fn next_is_strictly_greater() {
        let sched = Schedule::compile("0 * * * * * *").expect("compiles");
        let at_minute = Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap();
        let next = sched.next(at_minute).expect("has next firing");
        assert!(next > at_minute);
    }

    #[test]
    fn clone_is_functionally_identical() {
        let sched = Schedule::compile("*/5 * * * * * *").expect("compiles");
        let clone = sched.clone();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(sched.next(start), clone.next(start));
    }
}
