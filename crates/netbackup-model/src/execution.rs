// SPDX-License-Identifier: MIT OR Apache-2.0
//! Executions and the results workers report for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::job::Job;

/// One scheduled firing of a (device, job) binding at a specific instant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    /// The device to run against.
    pub device: Device,
    /// The job to run.
    pub job: Job,
    /// Second-resolution instant at which the job should run.
    pub timestamp: DateTime<Utc>,
}

/// What a worker produced when it actually ran an [`Execution`].
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Captured payload bytes, ready for the persistence pipeline.
    Artifact(Vec<u8>),
    /// Human-readable reason the execution did not complete. Never
    /// committed; logged only.
    Failure(String),
}

/// What a worker returns for an [`Execution`]: timing plus the outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    /// Job name.
    pub job: String,
    /// Device name.
    pub device: String,
    /// The instant the execution was scheduled for.
    pub job_timestamp: DateTime<Utc>,
    /// When the executor began work.
    pub start_timestamp: DateTime<Utc>,
    /// When the executor finished.
    pub end_timestamp: DateTime<Utc>,
    /// Captured payload or failure reason.
    pub outcome: Outcome,
}

impl ExecutionResult {
    /// The persistence-pipeline key this result serializes under:
    /// `device ⊕ job`.
    pub fn key(&self) -> (String, String) {
        (self.device.clone(), self.job.clone())
    }

    /// `true` if this result must not be persisted.
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure(_))
    }

    /// Wall-clock duration the execution took.
    pub fn elapsed(&self) -> chrono::Duration {
        self.end_timestamp - self.start_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn failure_results_are_never_persisted() {
        let result = ExecutionResult {
            job: "show".into(),
            device: "router1".into(),
            job_timestamp: at(100),
            start_timestamp: at(100),
            end_timestamp: at(101),
            outcome: Outcome::Failure("authentication failed".into()),
        };
        assert!(result.is_failure());
    }

    #[test]
    fn key_combines_device_and_job() {
        let result = ExecutionResult {
            job: "show".into(),
            device: "router1".into(),
            job_timestamp: at(100),
            start_timestamp: at(100),
            end_timestamp: at(105),
            outcome: Outcome::Artifact(b"hello".to_vec()),
        };
        assert_eq!(result.key(), ("router1".to_string(), "show".to_string()));
        assert_eq!(result.elapsed(), chrono::Duration::seconds(5));
    }
}
