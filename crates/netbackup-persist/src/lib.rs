// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Committer pool that serializes per-key writes of execution results
//! into a git-backed store.
//!
//! Results for the same key (`device ⊕ job`) are applied in arrival
//! order, one at a time; results for distinct keys may be applied
//! concurrently, up to the size of the committer pool. Each committer
//! runs on its own `std::thread`, not an async task, because each
//! commit blocks for an unbounded duration on `git` subprocess calls.
//! See [`Store`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use netbackup_error::{ErrorCode, NetbackupError};
use netbackup_git::GitUser;
use netbackup_model::{ExecutionResult, Outcome, Structure};

type Key = (String, String);

#[derive(Debug)]
struct Queues {
    pending: BTreeMap<Key, VecDeque<ExecutionResult>>,
    in_flight: BTreeMap<Key, usize>,
    waiting: BTreeMap<Key, VecDeque<ExecutionResult>>,
}

impl Queues {
    fn new() -> Self {
        Queues {
            pending: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            waiting: BTreeMap::new(),
        }
    }
}

/// Configuration needed to stand up a committer pool.
pub struct StoreConfig {
    /// Clone/push URL of the backing repository.
    pub url: String,
    /// Commit author identity.
    pub user: GitUser,
    /// Number of committer threads; must be at least 1.
    pub pool_size: usize,
    /// Non-empty set of path structures to write each result under.
    pub structure: Vec<Structure>,
    /// Directory under which each committer keeps its own clone.
    pub data_dir: PathBuf,
}

/// Entry point for handing execution results to the committer pool.
///
/// Cloning a `Store` is cheap: clones share the same queues and wake
/// the same pool of committer threads.
#[derive(Clone, Debug)]
pub struct Store {
    queues: Arc<Mutex<Queues>>,
    signal: Arc<Condvar>,
}

impl Store {
    /// Spawn `config.pool_size` committer threads, each with its own
    /// clone directory under `config.data_dir`, and return the handle
    /// used to enqueue results.
    pub fn spawn(config: StoreConfig) -> Result<Self, NetbackupError> {
        if config.pool_size == 0 {
            return Err(NetbackupError::new(
                ErrorCode::EmptyCommitterPool,
                "committer pool size must be at least 1",
            ));
        }
        if config.structure.is_empty() {
            return Err(NetbackupError::new(
                ErrorCode::ConfigInvalid,
                "committer pool needs at least one path structure",
            ));
        }

        let store = Store {
            queues: Arc::new(Mutex::new(Queues::new())),
            signal: Arc::new(Condvar::new()),
        };

        for i in 0..config.pool_size {
            let committer = Committer {
                dir: config.data_dir.join(format!("pool{}", i + 1)),
                url: config.url.clone(),
                user: config.user.clone(),
                structure: config.structure.clone(),
                queues: Arc::clone(&store.queues),
                signal: Arc::clone(&store.signal),
            };
            thread::Builder::new()
                .name(format!("netbackup-committer-{}", i + 1))
                .spawn(move || committer.run())
                .map_err(|e| {
                    NetbackupError::new(
                        ErrorCode::Internal,
                        format!("failed to spawn committer thread: {e}"),
                    )
                })?;
        }

        Ok(store)
    }

    /// Enqueue a result for durable recording. Results sharing a key
    /// with one already in flight are appended to that key's waiting
    /// list instead of pending, so a single committer is never handed
    /// the same key twice concurrently.
    pub fn store(&self, result: ExecutionResult) {
        let key = result.key();
        let mut queues = self.queues.lock().expect("queue lock poisoned");
        if queues.in_flight.contains_key(&key) {
            queues.waiting.entry(key).or_default().push_back(result);
        } else {
            queues.pending.entry(key).or_default().push_back(result);
        }
        drop(queues);
        self.signal.notify_one();
    }
}

struct Committer {
    dir: PathBuf,
    url: String,
    user: GitUser,
    structure: Vec<Structure>,
    queues: Arc<Mutex<Queues>>,
    signal: Arc<Condvar>,
}

impl Committer {
    fn run(self) {
        loop {
            let batch = self.await_batch();
            if batch.is_empty() {
                continue;
            }
            self.apply_batch(batch);
        }
    }

    /// Block on `work_signal` until `pending` holds something, then
    /// drain it breadth-first across keys into a local batch, marking
    /// each drained key as in flight.
    fn await_batch(&self) -> Vec<ExecutionResult> {
        let mut queues = self.queues.lock().expect("queue lock poisoned");
        while queues.pending.is_empty() {
            queues = self.signal.wait(queues).expect("queue lock poisoned");
        }

        let drained = std::mem::take(&mut queues.pending);
        let mut batch = Vec::new();
        for (key, results) in drained {
            *queues.in_flight.entry(key).or_insert(0) += results.len();
            batch.extend(results);
        }
        batch
    }

    fn apply_batch(&self, batch: Vec<ExecutionResult>) {
        if let Err(e) = self.prepare_clone() {
            tracing::warn!(
                dir = %self.dir.display(),
                error = %e,
                "could not prepare clone, discarding batch of {} result(s)",
                batch.len(),
            );
            self.finish_batch(&batch);
            return;
        }

        for result in &batch {
            if let Err(e) = self.commit_result(result) {
                tracing::warn!(
                    job = %result.job,
                    device = %result.device,
                    error = %e,
                    "failed to commit execution result",
                );
            }
        }

        if let Err(e) = netbackup_git::push(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "failed to push committed results");
        }

        self.finish_batch(&batch);
    }

    fn prepare_clone(&self) -> anyhow::Result<()> {
        netbackup_git::clone_if_absent(&self.dir, &self.url)?;
        netbackup_git::hard_reset_and_pull(&self.dir)?;
        Ok(())
    }

    fn commit_result(&self, result: &ExecutionResult) -> anyhow::Result<()> {
        if let Outcome::Artifact(bytes) = &result.outcome {
            for structure in &self.structure {
                let rel = structure.path_for(&result.device, &result.job);
                let path = self.dir.join(&rel);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, bytes)?;
            }
        }

        netbackup_git::stage_all(&self.dir)?;
        netbackup_git::commit(&self.dir, &commit_message(result), &self.user)?;
        Ok(())
    }

    /// Under lock: drop each batch result's key from `in_flight`; for
    /// every key whose `waiting` list is non-empty, promote it to
    /// `pending`, then re-signal once if anything was promoted.
    fn finish_batch(&self, batch: &[ExecutionResult]) {
        let mut counts: BTreeMap<Key, usize> = BTreeMap::new();
        for result in batch {
            *counts.entry(result.key()).or_insert(0) += 1;
        }

        let mut queues = self.queues.lock().expect("queue lock poisoned");
        let mut resignal = false;
        let keys: BTreeSet<Key> = counts.keys().cloned().collect();
        for key in keys {
            let drained = counts[&key];
            if let Some(remaining) = queues.in_flight.get_mut(&key) {
                *remaining = remaining.saturating_sub(drained);
                if *remaining == 0 {
                    queues.in_flight.remove(&key);
                }
            }
            if let Some(promoted) = queues.waiting.remove(&key) {
                if !promoted.is_empty() {
                    queues.pending.entry(key).or_default().extend(promoted);
                    resignal = true;
                }
            }
        }
        drop(queues);
        if resignal {
            self.signal.notify_all();
        }
    }
}

fn commit_message(result: &ExecutionResult) -> String {
    let mut message = format!(
        "Job: {}\nDevice: {}\nExpected: {}\nStart: {}\nEnd: {}\nElapsed: {}s",
        result.job,
        result.device,
        result.job_timestamp.to_rfc3339(),
        result.start_timestamp.to_rfc3339(),
        result.end_timestamp.to_rfc3339(),
        result.elapsed().num_seconds(),
    );
    if let Outcome::Failure(reason) = &result.outcome {
        message.push_str(&format!("\nFailure: {reason}"));
    }
    message
}
