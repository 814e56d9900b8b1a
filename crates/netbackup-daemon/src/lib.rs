// SPDX-License-Identifier: MIT OR Apache-2.0
//! The dispatch endpoint (C4): an Axum HTTP API serving `/worker/ping`,
//! `/worker/next`, and `/worker/complete` to workers, plus a plain
//! `/health` liveness endpoint for operators.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod middleware;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tracing::{info, warn};

use netbackup_config::Config;
use netbackup_error::NetbackupError;
use netbackup_model::{Execution, ExecutionResult, Outcome};
use netbackup_persist::Store;
use netbackup_scheduler::Scheduler;

/// Basic-auth credentials the controller was configured with, if any.
#[derive(Clone, Debug, Default)]
pub struct BasicAuth {
    /// Expected username.
    pub username: String,
    /// Expected password.
    pub password: String,
}

/// Shared state for every dispatch-endpoint handler.
#[derive(Clone)]
pub struct AppState {
    /// Tag-partitioned cadence index.
    pub scheduler: Arc<Scheduler>,
    /// Committer pool handle.
    pub store: Store,
    /// Configured credentials; `None` means auth is disabled.
    pub auth: Option<BasicAuth>,
    /// Maximum accepted `/worker/complete` body size, in bytes.
    pub max_job_bytes: u64,
    /// One of the committer pool's clone directories, used by `/health`
    /// to report backing-store reachability without reaching into the
    /// pool's internals.
    pub data_dir: PathBuf,
    /// Process start instant, for `/health` uptime reporting.
    pub started_at: Instant,
}

/// Build the dispatch-endpoint router.
pub fn build_app(state: Arc<AppState>) -> Router {
    let max_job_bytes = state.max_job_bytes;
    Router::new()
        .route("/worker/ping", get(worker_ping))
        .route("/worker/next", get(worker_next))
        .route(
            "/worker/complete",
            post(worker_complete).layer(DefaultBodyLimit::max(max_job_bytes as usize)),
        )
        .layer(from_fn_with_state(state.clone(), basic_auth_middleware))
        .route("/health", get(health))
        .layer(from_fn(middleware::RequestLogger::layer))
        .layer(from_fn(middleware::request_id_middleware))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Basic auth
// ---------------------------------------------------------------------------

/// Enforces `spec.md` §4.4's auth rule: absent credentials when configured
/// → 401; wrong credentials → 401; present credentials when *not*
/// configured → 403. `/health` is mounted outside this layer and is never
/// gated.
async fn basic_auth_middleware(
    State(state): State<Arc<AppState>>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match (&state.auth, header) {
        (None, None) => next.run(req).await,
        (None, Some(_)) => (StatusCode::FORBIDDEN, "credentials not accepted").into_response(),
        (Some(_), None) => (StatusCode::UNAUTHORIZED, "missing credentials").into_response(),
        (Some(expected), Some(value)) => {
            if credentials_match(expected, &value) {
                next.run(req).await
            } else {
                (StatusCode::UNAUTHORIZED, "invalid credentials").into_response()
            }
        }
    }
}

fn credentials_match(expected: &BasicAuth, header_value: &str) -> bool {
    let Some(encoded) = header_value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
    else {
        return false;
    };
    let Ok(text) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, pass)) = text.split_once(':') else {
        return false;
    };
    user == expected.username && pass == expected.password
}

// ---------------------------------------------------------------------------
// /health
// ---------------------------------------------------------------------------

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let reachable = netbackup_git::git_status(&state.data_dir).is_some();
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "backing_store_reachable": reachable,
    }))
}

// ---------------------------------------------------------------------------
// /worker/ping
// ---------------------------------------------------------------------------

async fn worker_ping() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// /worker/next
// ---------------------------------------------------------------------------

async fn worker_next(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, Response> {
    let tags: Vec<String> = pairs
        .iter()
        .filter(|(k, _)| k == "tag")
        .map(|(_, v)| v.clone())
        .collect();

    let seconds = find_int(&pairs, "seconds", 15)
        .map_err(|_| bad_request("seconds must be an integer"))?;
    let max = find_int(&pairs, "max", 15).map_err(|_| bad_request("max must be an integer"))?;

    let deadline = Utc::now() + chrono::Duration::seconds(seconds.max(0));
    let mut executions = Vec::new();
    for _ in 0..max.max(0) {
        match state.scheduler.next_execution(&tags, deadline) {
            Some(execution) => executions.push(execution),
            None => break,
        }
    }

    if executions.is_empty() {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(Json(executions).into_response())
    }
}

fn find_int(pairs: &[(String, String)], key: &str, default: i64) -> Result<i64, ()> {
    match pairs.iter().find(|(k, _)| k == key) {
        Some((_, v)) => v.parse::<i64>().map_err(|_| ()),
        None => Ok(default),
    }
}

// ---------------------------------------------------------------------------
// /worker/complete
// ---------------------------------------------------------------------------

async fn worker_complete(
    State(state): State<Arc<AppState>>,
    mut form: Multipart,
) -> Result<StatusCode, Response> {
    let mut job = None;
    let mut device = None;
    let mut job_timestamp = None;
    let mut start_timestamp = None;
    let mut end_timestamp = None;
    let mut failure: Option<String> = None;
    let mut file: Option<Vec<u8>> = None;

    loop {
        let field = match form.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(bad_request(&format!("invalid multipart body: {e}"))),
        };
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "job" | "device" | "job_timestamp" | "start_timestamp" | "end_timestamp" | "failure" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(&format!("invalid {name} field: {e}")))?;
                match name.as_str() {
                    "job" => job = Some(text),
                    "device" => device = Some(text),
                    "job_timestamp" => job_timestamp = Some(text),
                    "start_timestamp" => start_timestamp = Some(text),
                    "end_timestamp" => end_timestamp = Some(text),
                    "failure" => failure = Some(text),
                    _ => unreachable!(),
                }
            }
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(&format!("invalid file field: {e}")))?;
                file = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let job = non_empty(job).ok_or_else(|| bad_request("job is required"))?;
    let device = non_empty(device).ok_or_else(|| bad_request("device is required"))?;
    let job_timestamp = parse_timestamp(
        &non_empty(job_timestamp).ok_or_else(|| bad_request("job_timestamp is required"))?,
    )
    .ok_or_else(|| bad_request("job_timestamp is not a valid decimal-seconds timestamp"))?;
    let start_timestamp = parse_timestamp(
        &non_empty(start_timestamp).ok_or_else(|| bad_request("start_timestamp is required"))?,
    )
    .ok_or_else(|| bad_request("start_timestamp is not a valid decimal-seconds timestamp"))?;
    let end_timestamp = parse_timestamp(
        &non_empty(end_timestamp).ok_or_else(|| bad_request("end_timestamp is required"))?,
    )
    .ok_or_else(|| bad_request("end_timestamp is not a valid decimal-seconds timestamp"))?;

    let failure = failure.filter(|f| !f.is_empty());
    let file = file.filter(|f| !f.is_empty());

    if failure.is_none() && file.is_none() {
        return Err(bad_request("either failure or file must be non-empty"));
    }

    if let Some(reason) = failure {
        warn!(%job, %device, reason = %reason, "execution reported failure");
        return Ok(StatusCode::OK);
    }

    let result = ExecutionResult {
        job,
        device,
        job_timestamp,
        start_timestamp,
        end_timestamp,
        outcome: Outcome::Artifact(file.expect("checked above")),
    };
    state.store.store(result);
    Ok(StatusCode::OK)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let seconds: f64 = text.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(whole, nanos).single()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

// ---------------------------------------------------------------------------
// Controller bootstrap
// ---------------------------------------------------------------------------

/// Load configuration, assemble the catalog, stand up the scheduler and
/// committer pool, and serve the dispatch endpoint until the process is
/// terminated.
///
/// `verbose` overrides the configuration document's `log_level` with
/// `"netbackup=debug"`; otherwise logging follows `log_level`/`syslog` as
/// configured.
pub async fn run_controller(config_path: &Path, verbose: bool) -> anyhow::Result<()> {
    let config = Config::load(config_path).map_err(into_anyhow)?;
    config.validate().map_err(into_anyhow)?;

    let log_level = if verbose { "netbackup=debug" } else { config.log_level.as_str() };
    netbackup_telemetry::init(log_level, config.syslog)?;

    let catalog = config.catalog().map_err(into_anyhow)?;
    let bindings = catalog
        .bindings()
        .map_err(|errors| anyhow::anyhow!(netbackup_model::validate::join(&errors)))?;

    let scheduler = Arc::new(Scheduler::new(bindings));

    let data_dir = PathBuf::from(&config.data_store.git.data_dir);
    let store = Store::spawn(netbackup_persist::StoreConfig {
        url: config.data_store.git.url.clone(),
        user: netbackup_git::GitUser {
            friendly_name: config.data_store.git.user.friendly_name.clone(),
            email: config.data_store.git.user.email.clone(),
        },
        pool_size: config.data_store.git.pool_size,
        structure: config.data_store.git.structure.clone(),
        data_dir: data_dir.clone(),
    })
    .map_err(into_anyhow)?;

    let auth = match (&config.username, &config.password) {
        (Some(username), Some(password)) => Some(BasicAuth {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => None,
    };

    let state = Arc::new(AppState {
        scheduler,
        store,
        auth,
        max_job_bytes: config.max_job_bytes,
        data_dir: data_dir.join("pool1"),
        started_at: Instant::now(),
    });

    let app = build_app(state);
    let addr: SocketAddr = format!("{}:{}", config.ip, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(bind = %addr, "netbackup-daemon listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn into_anyhow(e: NetbackupError) -> anyhow::Error {
    anyhow::anyhow!(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use netbackup_git::GitUser;
    use netbackup_model::{Credentials, Device, DeviceSpec, Job, JobSpec, Structure};
    use std::collections::BTreeSet;
    use tower::ServiceExt;

    fn test_device(name: &str) -> Device {
        DeviceSpec {
            credentials: Some(Credentials { user: "admin".into(), password: "x".into() }),
            ..Default::default()
        }
        .finalize(name, &BTreeSet::new())
        .unwrap()
    }

    fn test_job(name: &str) -> Job {
        JobSpec {
            schedule: Some("* * * * * * *".into()),
            command_set: Some(vec![]),
            ..Default::default()
        }
        .finalize(name)
        .unwrap()
    }

    fn test_state(auth: Option<BasicAuth>) -> Arc<AppState> {
        let scheduler = Arc::new(Scheduler::new(vec![(test_device("d1"), test_job("j1"))]));
        let data_dir = tempfile::tempdir().unwrap().keep();
        let store = Store::spawn(netbackup_persist::StoreConfig {
            url: "file:///dev/null".into(),
            user: GitUser { friendly_name: "a".into(), email: "a@example.com".into() },
            pool_size: 1,
            structure: vec![Structure::ByDevice],
            data_dir: data_dir.clone(),
        })
        .unwrap();

        Arc::new(AppState {
            scheduler,
            store,
            auth,
            max_job_bytes: 1024 * 1024,
            data_dir: data_dir.join("pool1"),
            started_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn ping_returns_200_without_auth() {
        let app = build_app(test_state(None));
        let req = Request::builder().uri("/worker/ping").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ping_rejects_other_methods() {
        let app = build_app(test_state(None));
        let req = Request::builder().method("POST").uri("/worker/ping").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn ping_without_credentials_is_unauthorized_when_configured() {
        let auth = Some(BasicAuth { username: "u".into(), password: "p".into() });
        let app = build_app(test_state(auth));
        let req = Request::builder().uri("/worker/ping").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ping_with_wrong_credentials_is_unauthorized() {
        let auth = Some(BasicAuth { username: "u".into(), password: "p".into() });
        let app = build_app(test_state(auth));
        let basic = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, "u:wrong");
        let req = Request::builder()
            .uri("/worker/ping")
            .header(header::AUTHORIZATION, format!("Basic {basic}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ping_with_correct_credentials_succeeds() {
        let auth = Some(BasicAuth { username: "u".into(), password: "p".into() });
        let app = build_app(test_state(auth));
        let basic = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, "u:p");
        let req = Request::builder()
            .uri("/worker/ping")
            .header(header::AUTHORIZATION, format!("Basic {basic}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ping_with_unexpected_credentials_is_forbidden() {
        let app = build_app(test_state(None));
        let basic = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, "u:p");
        let req = Request::builder()
            .uri("/worker/ping")
            .header(header::AUTHORIZATION, format!("Basic {basic}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn next_with_max_zero_returns_204() {
        let app = build_app(test_state(None));
        let req = Request::builder().uri("/worker/next?max=0").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn next_with_malformed_seconds_returns_400() {
        let app = build_app(test_state(None));
        let req = Request::builder()
            .uri("/worker/next?seconds=not-a-number")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn next_returns_due_execution() {
        let app = build_app(test_state(None));
        let req = Request::builder().uri("/worker/next?seconds=5&max=1").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn timestamp_parses_decimal_seconds() {
        let parsed = parse_timestamp("1700000000.5").unwrap();
        assert_eq!(parsed.timestamp(), 1_700_000_000);
    }

    #[test]
    fn timestamp_rejects_non_numeric() {
        assert!(parse_timestamp("not-a-number").is_none());
    }
}
