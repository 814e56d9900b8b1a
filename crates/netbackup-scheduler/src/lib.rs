// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tag-partitioned cadence scheduler.
//!
//! [`Scheduler`] indexes every (device, job) binding under each of the
//! device's tags (or the empty-string tag, if it has none) once at
//! construction. `next_execution` walks the index for the caller's tags
//! in order, returning the first binding with work due before a
//! deadline. The index itself never mutates after construction; only a
//! binding's `last_emitted` instant is written, under that binding's own
//! mutex, so distinct bindings make progress independently.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use netbackup_model::{Device, Execution, Job};

/// One (device, job) pair with its own cadence progress.
struct Binding {
    device: Device,
    job: Job,
    last_emitted: Mutex<DateTime<Utc>>,
}

impl Binding {
    /// Attempt to advance this binding past its next firing, provided it
    /// lands strictly before `before`. Returns the firing instant on
    /// success, advancing `last_emitted` atomically with the check so two
    /// concurrent callers can never both win the same occurrence.
    fn claim_next(&self, before: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut last = self.last_emitted.lock().expect("binding mutex poisoned");
        let floor = std::cmp::max(Utc::now(), *last);
        let candidate = self.job.schedule.next(floor)?;
        if *last < candidate && candidate < before {
            *last = candidate;
            Some(candidate)
        } else {
            None
        }
    }
}

/// Tag-partitioned index over a fixed set of (device, job) bindings.
///
/// Construction order determines the tie-break order used by
/// `next_execution`: bindings are indexed in the order the catalog's
/// binding list was traversed, and that order is preserved within each
/// tag bucket for the lifetime of the scheduler.
pub struct Scheduler {
    by_tag: BTreeMap<String, Vec<Arc<Binding>>>,
}

impl Scheduler {
    /// Build a scheduler over `bindings`. `last_emitted` for every
    /// binding is initialized to the construction instant.
    pub fn new(bindings: Vec<(Device, Job)>) -> Self {
        let start = Utc::now();
        let mut by_tag: BTreeMap<String, Vec<Arc<Binding>>> = BTreeMap::new();
        for (device, job) in bindings {
            let binding = Arc::new(Binding {
                device: device.clone(),
                job,
                last_emitted: Mutex::new(start),
            });
            if device.tags.is_empty() {
                by_tag.entry(String::new()).or_default().push(binding);
            } else {
                for tag in &device.tags {
                    by_tag.entry(tag.clone()).or_default().push(binding.clone());
                }
            }
        }
        tracing::debug!(tags = by_tag.len(), "scheduler index built");
        Scheduler { by_tag }
    }

    /// Find the next due execution among `tags` (treated as `[""]` when
    /// empty) that fires strictly before `before`.
    ///
    /// Tie-break: first tag in `tags`' order, then first binding in that
    /// tag's index order. Not earliest-deadline-first by design — see the
    /// scheduler fairness note in the design documentation.
    pub fn next_execution(&self, tags: &[String], before: DateTime<Utc>) -> Option<Execution> {
        let owned;
        let tags: &[String] = if tags.is_empty() {
            owned = [String::new()];
            &owned
        } else {
            tags
        };
        for tag in tags {
            let Some(bindings) = self.by_tag.get(tag) else {
                continue;
            };
            for binding in bindings {
                if let Some(timestamp) = binding.claim_next(before) {
                    return Some(Execution {
                        device: binding.device.clone(),
                        job: binding.job.clone(),
                        timestamp,
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use netbackup_model::{Credentials, DeviceSpec, JobSpec};
    use std::collections::BTreeSet;

    fn device(name: &str, tags: &[&str]) -> Device {
        DeviceSpec {
            credentials: Some(Credentials {
                user: "admin".into(),
                password: "x".into(),
            }),
            tags: Some(tags.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        }
        .finalize(name, &BTreeSet::new())
        .unwrap()
    }

    fn job(name: &str, cron: &str) -> Job {
        JobSpec {
            schedule: Some(cron.into()),
            command_set: Some(vec![]),
            ..Default::default()
        }
        .finalize(name)
        .unwrap()
    }

    #[test]
    fn untagged_binding_lands_in_empty_tag_bucket() {
        let scheduler = Scheduler::new(vec![(device("d1", &[]), job("j1", "* * * * * * *"))]);
        let before = Utc::now() + Duration::seconds(5);
        let exec = scheduler.next_execution(&[], before);
        assert!(exec.is_some());
    }

    #[test]
    fn never_emits_same_binding_timestamp_twice() {
        let scheduler = Scheduler::new(vec![(device("d1", &[]), job("j1", "* * * * * * *"))]);
        let before = Utc::now() + Duration::seconds(10);
        let first = scheduler.next_execution(&[], before).unwrap();
        let second = scheduler.next_execution(&[], before).unwrap();
        assert!(second.timestamp > first.timestamp);
    }

    #[test]
    fn respects_tag_filter() {
        let scheduler = Scheduler::new(vec![
            (device("d1", &["east"]), job("j1", "* * * * * * *")),
            (device("d2", &["west"]), job("j2", "* * * * * * *")),
        ]);
        let before = Utc::now() + Duration::seconds(5);
        let exec = scheduler
            .next_execution(&["west".to_string()], before)
            .unwrap();
        assert_eq!(exec.device.name, "d2");
    }

    #[test]
    fn returns_none_when_nothing_due_in_window() {
        let scheduler = Scheduler::new(vec![(device("d1", &[]), job("j1", "0 0 1 1 * * 2099"))]);
        let before = Utc::now() + Duration::seconds(5);
        assert!(scheduler.next_execution(&[], before).is_none());
    }

    #[test]
    fn tie_break_is_tag_order_then_insertion_order() {
        let scheduler = Scheduler::new(vec![
            (device("d1", &["shared"]), job("j1", "* * * * * * *")),
            (device("d2", &["shared"]), job("j2", "* * * * * * *")),
        ]);
        let before = Utc::now() + Duration::seconds(5);
        let exec = scheduler
            .next_execution(&["shared".to_string()], before)
            .unwrap();
        assert_eq!(exec.device.name, "d1");
    }
}
