// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for netbackup.
//!
//! Every netbackup error carries an [`ErrorCode`] (a machine-readable,
//! stable string tag), a human-readable message, an optional cause chain,
//! and arbitrary key-value context. Use the builder returned by
//! [`NetbackupError::new`] to construct errors fluently.
//!
//! The five [`ErrorCategory`] variants mirror the error-kind taxonomy of
//! the system design: configuration errors are fatal at startup, transient
//! device and persistence errors are recoverable on the next scheduled
//! firing, protocol errors originate from the controller's HTTP responses,
//! and programmer errors are unrecoverable.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Fatal at startup; aggregated across the whole catalog, never
    /// per-entry.
    Configuration,
    /// Session open, authentication, or expect-loop failures. Reported as
    /// a `Result` with a `failure` string; never committed.
    TransientDevice,
    /// Reset/pull/commit/push failure against the backing repository.
    /// Logged; the affected batch is abandoned and retried at the next
    /// firing.
    TransientPersistence,
    /// A non-2xx response from the controller's HTTP API.
    Protocol,
    /// Unrecoverable: malformed literals, logic errors. Aborts the
    /// process.
    Programmer,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::TransientDevice => "transient_device",
            Self::TransientPersistence => "transient_persistence",
            Self::Protocol => "protocol",
            Self::Programmer => "programmer",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Configuration --
    /// An entry named a generic that does not exist in the catalog.
    UnknownGeneric,
    /// A cadence expression failed to compile.
    InvalidCron,
    /// Two entities in the same store share a name.
    DuplicateEntityName,
    /// `job_store.type` / `device_store.type` / `data_store.type` named an
    /// unrecognized implementation.
    UnknownStoreType,
    /// The backing repository could not be reached at startup.
    RepositoryUnreachable,
    /// `pool_size = 0` was configured.
    EmptyCommitterPool,
    /// The configuration document failed to parse or deserialize.
    ConfigInvalid,

    // -- Transient device --
    /// Unable to open a session to the device.
    SessionUnavailable,
    /// Credentials were rejected by the device.
    AuthenticationFailed,
    /// An `expect_not` pattern matched the step buffer.
    ExpectNotMatched,
    /// The step timed out without any `expect` pattern matching.
    ExpectTimedOut,
    /// Fetching or decompressing a file failed.
    FileFetchFailed,

    // -- Transient persistence --
    /// `git reset`/`git pull` failed while preparing a clone for commits.
    RepositorySyncFailed,
    /// `git add`/`git commit` failed.
    CommitFailed,
    /// `git push` failed after committing.
    PushFailed,

    // -- Protocol --
    /// The controller returned a 4xx response.
    ControllerRejected,
    /// The controller returned a 5xx response.
    ControllerError,

    // -- Programmer --
    /// A literal URL or path failed to parse.
    MalformedLiteral,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownGeneric
            | Self::InvalidCron
            | Self::DuplicateEntityName
            | Self::UnknownStoreType
            | Self::RepositoryUnreachable
            | Self::EmptyCommitterPool
            | Self::ConfigInvalid => ErrorCategory::Configuration,

            Self::SessionUnavailable
            | Self::AuthenticationFailed
            | Self::ExpectNotMatched
            | Self::ExpectTimedOut
            | Self::FileFetchFailed => ErrorCategory::TransientDevice,

            Self::RepositorySyncFailed | Self::CommitFailed | Self::PushFailed => {
                ErrorCategory::TransientPersistence
            }

            Self::ControllerRejected | Self::ControllerError => ErrorCategory::Protocol,

            Self::MalformedLiteral | Self::Internal => ErrorCategory::Programmer,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"UNKNOWN_GENERIC"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownGeneric => "UNKNOWN_GENERIC",
            Self::InvalidCron => "INVALID_CRON",
            Self::DuplicateEntityName => "DUPLICATE_ENTITY_NAME",
            Self::UnknownStoreType => "UNKNOWN_STORE_TYPE",
            Self::RepositoryUnreachable => "REPOSITORY_UNREACHABLE",
            Self::EmptyCommitterPool => "EMPTY_COMMITTER_POOL",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::SessionUnavailable => "SESSION_UNAVAILABLE",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::ExpectNotMatched => "EXPECT_NOT_MATCHED",
            Self::ExpectTimedOut => "EXPECT_TIMED_OUT",
            Self::FileFetchFailed => "FILE_FETCH_FAILED",
            Self::RepositorySyncFailed => "REPOSITORY_SYNC_FAILED",
            Self::CommitFailed => "COMMIT_FAILED",
            Self::PushFailed => "PUSH_FAILED",
            Self::ControllerRejected => "CONTROLLER_REJECTED",
            Self::ControllerError => "CONTROLLER_ERROR",
            Self::MalformedLiteral => "MALFORMED_LITERAL",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NetbackupError
// ---------------------------------------------------------------------------

/// Unified netbackup error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use netbackup_error::{NetbackupError, ErrorCode};
///
/// let err = NetbackupError::new(ErrorCode::AuthenticationFailed, "bad password")
///     .with_context("device", "router1")
///     .with_context("user", "admin");
/// ```
pub struct NetbackupError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl NetbackupError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for NetbackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("NetbackupError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for NetbackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for NetbackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Aggregates multiple [`NetbackupError`]s raised while validating an
/// entire catalog, so configuration failures are reported together rather
/// than stopping at the first.
#[derive(Debug, Default)]
pub struct ErrorAggregate {
    errors: Vec<NetbackupError>,
}

impl ErrorAggregate {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn push(&mut self, err: NetbackupError) {
        self.errors.push(err);
    }

    /// True if no errors were recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Consume the aggregate, returning `Ok(())` if empty or `Err(self)`
    /// otherwise.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ErrorAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} validation error(s):", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorAggregate {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::UnknownGeneric,
        ErrorCode::InvalidCron,
        ErrorCode::DuplicateEntityName,
        ErrorCode::UnknownStoreType,
        ErrorCode::RepositoryUnreachable,
        ErrorCode::EmptyCommitterPool,
        ErrorCode::ConfigInvalid,
        ErrorCode::SessionUnavailable,
        ErrorCode::AuthenticationFailed,
        ErrorCode::ExpectNotMatched,
        ErrorCode::ExpectTimedOut,
        ErrorCode::FileFetchFailed,
        ErrorCode::RepositorySyncFailed,
        ErrorCode::CommitFailed,
        ErrorCode::PushFailed,
        ErrorCode::ControllerRejected,
        ErrorCode::ControllerError,
        ErrorCode::MalformedLiteral,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = NetbackupError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = NetbackupError::new(ErrorCode::AuthenticationFailed, "bad password");
        assert_eq!(err.to_string(), "[AUTHENTICATION_FAILED] bad password");
    }

    #[test]
    fn display_with_context() {
        let err = NetbackupError::new(ErrorCode::ExpectTimedOut, "never matched")
            .with_context("timeout", 20);
        let s = err.to_string();
        assert!(s.starts_with("[EXPECT_TIMED_OUT] never matched"));
        assert!(s.contains("timeout"));
    }

    #[test]
    fn debug_with_source() {
        let src = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err = NetbackupError::new(ErrorCode::FileFetchFailed, "fetch failed").with_source(src);
        let dbg = format!("{err:?}");
        assert!(dbg.contains("source"));
        assert!(dbg.contains("file missing"));
    }

    #[test]
    fn categories_match_spec_kinds() {
        assert_eq!(
            ErrorCode::UnknownGeneric.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            ErrorCode::AuthenticationFailed.category(),
            ErrorCategory::TransientDevice
        );
        assert_eq!(
            ErrorCode::PushFailed.category(),
            ErrorCategory::TransientPersistence
        );
        assert_eq!(
            ErrorCode::ControllerRejected.category(),
            ErrorCategory::Protocol
        );
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::Programmer);
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()));
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn error_code_serde_roundtrip() {
        let code = ErrorCode::InvalidCron;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#""INVALID_CRON""#);
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn aggregate_collects_all_errors() {
        let mut agg = ErrorAggregate::new();
        agg.push(NetbackupError::new(ErrorCode::UnknownGeneric, "device1: no such generic"));
        agg.push(NetbackupError::new(ErrorCode::InvalidCron, "job2: bad cron"));
        assert_eq!(agg.len(), 2);
        let s = agg.to_string();
        assert!(s.contains("device1"));
        assert!(s.contains("job2"));
        assert!(agg.into_result().is_err());
    }

    #[test]
    fn empty_aggregate_is_ok() {
        let agg = ErrorAggregate::new();
        assert!(agg.is_empty());
        assert!(agg.into_result().is_ok());
    }

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = NetbackupError::new(ErrorCode::RepositorySyncFailed, "sync failed")
            .with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }
}
