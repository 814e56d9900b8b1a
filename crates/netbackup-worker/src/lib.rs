// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Worker tick loop: polls a controller over HTTP for due [`Execution`]s and
//! runs each one against its device via `netbackup_executor`.
//!
//! Mirrors the controller/worker split of spec component C5: a single
//! tick-exclusion lock guards the "how many more jobs can I take on" check,
//! and every dispatched execution runs on its own task so a slow device
//! never blocks the rest of the fleet.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use netbackup_executor::ssh::Ssh2Opener;
use netbackup_model::{Execution, ExecutionResult, Outcome};
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

/// Worker startup/runtime options, one field per `worker` CLI flag.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Base URL of the controller, e.g. `https://controller.example:9400`.
    pub controller: String,
    /// Tags to restrict polling to; empty means "untagged only", matching
    /// the controller's own empty-tag-bucket convention.
    pub tags: Vec<String>,
    /// Seconds between ticks is half of this; also the `seconds` query
    /// parameter sent to `/worker/next`.
    pub sleep_seconds: u64,
    /// Maximum number of executions resident at once.
    pub max_jobs: usize,
    /// Per-request HTTP timeout, in seconds.
    pub timeout_seconds: u64,
    /// Disable TLS certificate verification. Mutually exclusive with `cafile`.
    pub noverify: bool,
    /// Path to a PEM file of additional trusted CA certificates.
    pub cafile: Option<PathBuf>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            controller: String::new(),
            tags: Vec::new(),
            sleep_seconds: 15,
            max_jobs: 2000,
            timeout_seconds: 3,
            noverify: false,
            cafile: None,
        }
    }
}

/// Build the `reqwest::Client` used for controller communication, honoring
/// `--cafile`/`--noverify`.
fn build_client(opts: &WorkerOptions) -> anyhow::Result<Client> {
    if opts.noverify && opts.cafile.is_some() {
        anyhow::bail!("--noverify and --cafile are mutually exclusive");
    }

    let mut builder = Client::builder().timeout(Duration::from_secs(opts.timeout_seconds));
    if opts.noverify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(path) = &opts.cafile {
        let pem = std::fs::read(path)?;
        let cert = reqwest::Certificate::from_pem(&pem)?;
        builder = builder.add_root_certificate(cert);
    }
    Ok(builder.build()?)
}

/// Validate the controller URL scheme, build the HTTP client, and run the
/// worker loop forever. Returns an error if the URL is unparsable, the
/// scheme is unsupported, or the startup ping fails.
pub async fn run_worker(opts: WorkerOptions) -> anyhow::Result<()> {
    let url = reqwest::Url::parse(&opts.controller)?;
    match url.scheme() {
        "http" | "https" => {}
        other => anyhow::bail!("unsupported controller URL scheme: {other}"),
    }

    let client = build_client(&opts)?;
    ping(&client, &opts.controller).await?;
    info!(controller = %opts.controller, max_jobs = opts.max_jobs, "worker started");

    let running = Arc::new(AtomicUsize::new(0));
    let tick_lock = Arc::new(AsyncMutex::new(()));
    let opener = Arc::new(Ssh2Opener);

    let period = Duration::from_secs((opts.sleep_seconds / 2).max(1));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        tick(&client, &opts, &running, &tick_lock, &opener).await;
    }
}

async fn ping(client: &Client, controller: &str) -> anyhow::Result<()> {
    let url = format!("{}/worker/ping", controller.trim_end_matches('/'));
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("controller ping failed: {}", resp.status());
    }
    Ok(())
}

async fn tick(
    client: &Client,
    opts: &WorkerOptions,
    running: &Arc<AtomicUsize>,
    tick_lock: &Arc<AsyncMutex<()>>,
    opener: &Arc<Ssh2Opener>,
) {
    let _guard = tick_lock.lock().await;

    let needed = opts.max_jobs as isize - running.load(Ordering::SeqCst) as isize;
    if needed <= 0 {
        return;
    }

    match next_executions(client, opts, needed as usize).await {
        Ok(executions) => {
            for execution in executions {
                dispatch(client.clone(), opts.controller.clone(), running.clone(), opener.clone(), execution);
            }
        }
        Err(e) => warn!(error = %e, "failed to fetch next executions"),
    }
}

async fn next_executions(
    client: &Client,
    opts: &WorkerOptions,
    max: usize,
) -> anyhow::Result<Vec<Execution>> {
    let mut query: Vec<(String, String)> = vec![
        ("seconds".to_string(), opts.sleep_seconds.to_string()),
        ("max".to_string(), max.to_string()),
    ];
    for tag in &opts.tags {
        query.push(("tag".to_string(), tag.clone()));
    }

    let url = format!("{}/worker/next", opts.controller.trim_end_matches('/'));
    let resp = client.get(&url).query(&query).send().await?;

    if resp.status() == StatusCode::NO_CONTENT {
        return Ok(Vec::new());
    }
    if !resp.status().is_success() {
        anyhow::bail!("unexpected status from /worker/next: {}", resp.status());
    }
    Ok(resp.json().await?)
}

/// Spawn one task that waits until `execution.timestamp`, runs it, and posts
/// the result. `running` is incremented here and decremented once the
/// executor returns, capping resident work at `max_jobs`.
fn dispatch(
    client: Client,
    controller: String,
    running: Arc<AtomicUsize>,
    opener: Arc<Ssh2Opener>,
    execution: Execution,
) {
    running.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(async move {
        let now = Utc::now();
        if execution.timestamp > now {
            if let Ok(delay) = (execution.timestamp - now).to_std() {
                tokio::time::sleep(delay).await;
            }
        }

        let job = execution.job.name.clone();
        let device = execution.device.name.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            netbackup_executor::execute(&execution, opener.as_ref())
        })
        .await;

        running.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(result) => {
                if let Err(e) = complete(&client, &controller, result).await {
                    warn!(%job, %device, error = %e, "failed to post completion");
                }
            }
            Err(e) => warn!(%job, %device, error = %e, "executor task panicked"),
        }
    });
}

async fn complete(client: &Client, controller: &str, result: ExecutionResult) -> anyhow::Result<()> {
    let url = format!("{}/worker/complete", controller.trim_end_matches('/'));

    let mut form = reqwest::multipart::Form::new()
        .text("job", result.job)
        .text("device", result.device)
        .text("job_timestamp", decimal_seconds(result.job_timestamp))
        .text("start_timestamp", decimal_seconds(result.start_timestamp))
        .text("end_timestamp", decimal_seconds(result.end_timestamp));

    form = match result.outcome {
        Outcome::Artifact(bytes) => {
            form.part("file", reqwest::multipart::Part::bytes(bytes).file_name("artifact"))
        }
        Outcome::Failure(reason) => form.text("failure", reason),
    };

    let resp = client.post(&url).multipart(form).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("controller rejected completion: {}", resp.status());
    }
    Ok(())
}

fn decimal_seconds(ts: chrono::DateTime<Utc>) -> String {
    format!("{}.{:09}", ts.timestamp(), ts.timestamp_subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cafile_and_noverify_are_mutually_exclusive() {
        let opts = WorkerOptions {
            noverify: true,
            cafile: Some(PathBuf::from("/tmp/ca.pem")),
            ..Default::default()
        };
        let err = build_client(&opts).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn noverify_alone_builds_a_client() {
        let opts = WorkerOptions { noverify: true, ..Default::default() };
        assert!(build_client(&opts).is_ok());
    }

    #[test]
    fn decimal_seconds_formats_whole_and_fractional_parts() {
        let ts = Utc.timestamp_opt(1_000, 500_000_000).unwrap();
        assert_eq!(decimal_seconds(ts), "1000.500000000");
    }

    use chrono::TimeZone;

    #[tokio::test]
    async fn run_worker_rejects_unsupported_scheme() {
        let opts = WorkerOptions { controller: "ftp://controller".to_string(), ..Default::default() };
        let err = run_worker(opts).await.unwrap_err();
        assert!(err.to_string().contains("unsupported controller URL scheme"));
    }

    #[tokio::test]
    async fn run_worker_fails_startup_when_ping_is_not_ok() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/worker/ping"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let opts = WorkerOptions { controller: server.uri(), ..Default::default() };
        let client = build_client(&opts).unwrap();
        let err = ping(&client, &opts.controller).await.unwrap_err();
        assert!(err.to_string().contains("ping failed"));
    }

    #[tokio::test]
    async fn next_executions_treats_204_as_empty() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/worker/next"))
            .respond_with(wiremock::ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let opts = WorkerOptions { controller: server.uri(), ..Default::default() };
        let client = build_client(&opts).unwrap();
        let executions = next_executions(&client, &opts, 15).await.unwrap();
        assert!(executions.is_empty());
    }

    #[tokio::test]
    async fn next_executions_errors_on_non_success_status() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/worker/next"))
            .respond_with(wiremock::ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let opts = WorkerOptions { controller: server.uri(), ..Default::default() };
        let client = build_client(&opts).unwrap();
        let err = next_executions(&client, &opts, 15).await.unwrap_err();
        assert!(err.to_string().contains("unexpected status"));
    }
}
