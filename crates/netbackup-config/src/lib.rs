// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for netbackup.
//!
//! The top-level [`Config`] deserializes the single TOML document a
//! controller process is started with. Catalog assembly (generics,
//! merge, per-entity validation) is delegated to `netbackup-model`;
//! this crate owns only the document shape and the configuration-level
//! checks that apply before a catalog is even attempted (TLS pairing,
//! basic-auth pairing, committer pool size, store type dispatch).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use netbackup_error::{ErrorAggregate, ErrorCode, NetbackupError};
use netbackup_model::{Catalog, DeviceSpec, JobSpec, Structure};

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9400
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_job_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_pool_size() -> usize {
    20
}

fn default_structure() -> Vec<Structure> {
    vec![Structure::ByDevice]
}

/// TLS certificate/key pair. Both fields are required together; the
/// controller serves plaintext HTTP if omitted entirely.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM certificate file path.
    pub cert_file: String,
    /// PEM private key file path.
    pub key_file: String,
}

/// Git committer identity used for commit authorship.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataStoreGitUser {
    /// Display name recorded as the commit author.
    pub friendly_name: String,
    /// Email recorded as the commit author.
    pub email: String,
    /// Username for authenticating pushes, if the remote requires it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password or token for authenticating pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Git-backed persistence store configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataStoreGitConfig {
    /// Clone/push URL of the backing repository.
    pub url: String,
    /// Committer identity.
    pub user: DataStoreGitUser,
    /// Number of committer threads.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Non-empty subset of path structures to write results under.
    #[serde(default = "default_structure")]
    pub structure: Vec<Structure>,
    /// Directory under which each committer keeps its own clone.
    pub data_dir: String,
}

/// Top-level persistence store selection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataStoreConfig {
    /// Implementation selector. Only `"git"` is recognized.
    #[serde(rename = "type")]
    pub kind: String,
    /// Git-specific settings, required when `kind == "git"`.
    pub git: DataStoreGitConfig,
}

/// Local, in-memory job catalog configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct JobStoreLocalConfig {
    /// Named generics jobs may inherit from.
    #[serde(default)]
    pub job_generics: BTreeMap<String, JobSpec>,
    /// Concrete job entries.
    #[serde(default)]
    pub jobs: BTreeMap<String, JobSpec>,
}

/// Job store selection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JobStoreConfig {
    /// Implementation selector. Only `"local"` is recognized.
    #[serde(rename = "type")]
    pub kind: String,
    /// Settings for the `local` implementation.
    #[serde(flatten)]
    pub local: JobStoreLocalConfig,
}

/// Local, in-memory device catalog configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceStoreLocalConfig {
    /// Named generics devices may inherit from.
    #[serde(default)]
    pub device_generics: BTreeMap<String, DeviceSpec>,
    /// Concrete device entries.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceSpec>,
}

/// Device store selection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeviceStoreConfig {
    /// Implementation selector. Only `"local"` is recognized.
    #[serde(rename = "type")]
    pub kind: String,
    /// Settings for the `local` implementation.
    #[serde(flatten)]
    pub local: DeviceStoreLocalConfig,
}

/// The controller's configuration document.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Bind address.
    #[serde(default = "default_ip")]
    pub ip: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// `tracing` filter directive, e.g. `"info"` or `"netbackup=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Route logs to the local syslog facility in addition to stdout.
    #[serde(default)]
    pub syslog: bool,
    /// Maximum accepted size of a `/worker/complete` multipart body.
    #[serde(default = "default_max_job_bytes")]
    pub max_job_bytes: u64,
    /// TLS settings; omit for plaintext HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Basic-auth username; must be set together with `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Basic-auth password; must be set together with `username`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Persistence backing store.
    pub data_store: DataStoreConfig,
    /// Job catalog source.
    pub job_store: JobStoreConfig,
    /// Device catalog source.
    pub device_store: DeviceStoreConfig,
}

impl Config {
    /// Parse a configuration document from a TOML string.
    pub fn from_str(text: &str) -> Result<Config, NetbackupError> {
        toml::from_str(text).map_err(|e| {
            NetbackupError::new(ErrorCode::ConfigInvalid, format!("failed to parse config: {e}"))
        })
    }

    /// Load and parse a configuration document from `path`.
    pub fn load(path: &Path) -> Result<Config, NetbackupError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NetbackupError::new(ErrorCode::ConfigInvalid, format!("failed to read config: {e}"))
                .with_context("path", path.display().to_string())
        })?;
        Self::from_str(&text)
    }

    /// Configuration-level checks that do not require building the
    /// catalog: field pairing, store type dispatch, and numeric bounds.
    ///
    /// Every violation is collected before returning, matching the
    /// catalog's own aggregate-don't-stop-at-first-error policy.
    pub fn validate(&self) -> Result<(), NetbackupError> {
        let mut errors = ErrorAggregate::new();

        if self.username.is_some() != self.password.is_some() {
            errors.push(NetbackupError::new(
                ErrorCode::ConfigInvalid,
                "username and password must both be set or both be omitted",
            ));
        }

        if self.ip.parse::<IpAddr>().is_err() {
            errors.push(
                NetbackupError::new(ErrorCode::ConfigInvalid, "ip is not a valid address")
                    .with_context("ip", self.ip.clone()),
            );
        }

        if self.data_store.kind != "git" {
            errors.push(
                NetbackupError::new(ErrorCode::UnknownStoreType, "unrecognized data_store type")
                    .with_context("type", self.data_store.kind.clone()),
            );
        } else {
            if self.data_store.git.pool_size == 0 {
                errors.push(NetbackupError::new(
                    ErrorCode::EmptyCommitterPool,
                    "data_store.git.pool_size must be at least 1",
                ));
            }
            if self.data_store.git.structure.is_empty() {
                errors.push(NetbackupError::new(
                    ErrorCode::ConfigInvalid,
                    "data_store.git.structure must name at least one layout",
                ));
            }
        }

        if self.job_store.kind != "local" {
            errors.push(
                NetbackupError::new(ErrorCode::UnknownStoreType, "unrecognized job_store type")
                    .with_context("type", self.job_store.kind.clone()),
            );
        }

        if self.device_store.kind != "local" {
            errors.push(
                NetbackupError::new(ErrorCode::UnknownStoreType, "unrecognized device_store type")
                    .with_context("type", self.device_store.kind.clone()),
            );
        }

        errors.into_result().map_err(|agg| {
            NetbackupError::new(ErrorCode::ConfigInvalid, agg.to_string())
        })
    }

    /// Assemble the job and device catalog from this configuration.
    ///
    /// Runs [`Config::validate`] first so configuration-level mistakes
    /// are reported before catalog-entity ones.
    pub fn catalog(&self) -> Result<Catalog, NetbackupError> {
        self.validate()?;
        Catalog::assemble(
            &self.job_store.local.job_generics,
            &self.job_store.local.jobs,
            &self.device_store.local.device_generics,
            &self.device_store.local.devices,
        )
        .map_err(|errors| {
            NetbackupError::new(
                ErrorCode::ConfigInvalid,
                netbackup_model::validate::join(&errors),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_doc() -> &'static str {
        r##"
        [data_store]
        type = "git"

        [data_store.git]
        url = "https://git.example.com/backups.git"
        data_dir = "/var/lib/netbackup"

        [data_store.git.user]
        friendly_name = "netbackup"
        email = "netbackup@example.com"

        [job_store]
        type = "local"

        [job_store.jobs.show]
        schedule = "*/30 * * * * * *"
        command_set = [{ command = "show version", expect = ["#"], timeout = 10 }]

        [device_store]
        type = "local"

        [device_store.devices.router1]
        [device_store.devices.router1.credentials]
        user = "admin"
        password = "hunter2"

        [device_store.devices.router1.job_overrides.show]
        "##
    }

    #[test]
    fn parses_defaults() {
        let cfg = Config::from_str(minimal_doc()).unwrap();
        assert_eq!(cfg.ip, "0.0.0.0");
        assert_eq!(cfg.port, 9400);
        assert_eq!(cfg.max_job_bytes, 500 * 1024 * 1024);
        assert_eq!(cfg.data_store.git.pool_size, 20);
        assert_eq!(cfg.data_store.git.structure, vec![Structure::ByDevice]);
    }

    #[test]
    fn validate_rejects_partial_basic_auth() {
        let mut cfg = Config::from_str(minimal_doc()).unwrap();
        cfg.username = Some("admin".into());
        let err = cfg.validate().unwrap_err();
        assert!(err.message.contains("username and password"));
    }

    #[test]
    fn validate_rejects_zero_pool_size() {
        let mut cfg = Config::from_str(minimal_doc()).unwrap();
        cfg.data_store.git.pool_size = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.message.contains("pool_size"));
    }

    #[test]
    fn validate_rejects_unknown_store_types() {
        let mut cfg = Config::from_str(minimal_doc()).unwrap();
        cfg.job_store.kind = "remote".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.message.contains("job_store"));
    }

    #[test]
    fn catalog_builds_from_valid_config() {
        let cfg = Config::from_str(minimal_doc()).unwrap();
        let catalog = cfg.catalog().unwrap();
        assert_eq!(catalog.jobs().len(), 1);
        assert_eq!(catalog.devices().len(), 1);
        assert_eq!(catalog.bindings().unwrap().len(), 1);
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netbackup.toml");
        std::fs::write(&path, minimal_doc()).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.job_store.local.jobs.len(), 1);
    }

    #[test]
    fn round_trips_through_serialize() {
        let cfg = Config::from_str(minimal_doc()).unwrap();
        let text = toml::to_string(&cfg).unwrap();
        let reloaded = Config::from_str(&text).unwrap();
        assert_eq!(cfg, reloaded);
    }
}
