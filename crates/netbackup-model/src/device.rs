// SPDX-License-Identifier: MIT OR Apache-2.0
//! Devices and their per-device job overrides.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobSpec};
use crate::validate::ValidationError;

/// Transport variant for a device. Currently only secure-shell.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Protocol {
    /// SSH, with an optional legacy-cipher compatibility mode for older
    /// network gear.
    SecureShell {
        /// TCP port; defaults to 22.
        #[serde(default = "default_ssh_port")]
        port: u16,
        /// Enable legacy block-cipher modes for devices that predate
        /// modern SSH cipher suites.
        #[serde(default)]
        legacy_ciphers: bool,
    },
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::SecureShell {
            port: default_ssh_port(),
            legacy_ciphers: false,
        }
    }
}

/// Username/password pair. Key-based authentication is out of scope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// Login username.
    pub user: String,
    /// Login password.
    pub password: String,
}

/// A fully assembled device: identity, reachability, and its per-job
/// overrides.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Device {
    /// Name, unique within the catalog.
    pub name: String,
    /// Hostname or IP; defaults to `name` if unset in the source spec.
    pub host: String,
    /// Transport variant.
    pub protocol: Protocol,
    /// Free-form labels used by workers to filter bindings.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Login credentials.
    pub credentials: Credentials,
    /// Job name → override, applied on top of the catalog's assembled job
    /// of the same name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub job_overrides: BTreeMap<String, JobSpec>,
}

/// Raw, partially-specified device overlay as it appears in
/// configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceSpec {
    /// Name of the generic to inherit from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic: Option<String>,
    /// Hostname or IP override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Transport variant override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// Tags to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    /// Credentials override; replaces the whole pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Per-job overrides, merged key-wise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_overrides: Option<BTreeMap<String, JobSpec>>,
}

impl DeviceSpec {
    /// Apply `overlay` on top of `self`, following the same merge rule as
    /// [`crate::job::JobSpec::apply`].
    pub fn apply(mut self, overlay: &DeviceSpec) -> DeviceSpec {
        if overlay.host.is_some() {
            self.host = overlay.host.clone();
        }
        if overlay.protocol.is_some() {
            self.protocol = overlay.protocol.clone();
        }
        if let Some(tags) = &overlay.tags {
            self.tags.get_or_insert_with(BTreeSet::new).extend(tags.iter().cloned());
        }
        if overlay.credentials.is_some() {
            self.credentials = overlay.credentials.clone();
        }
        if let Some(overrides) = &overlay.job_overrides {
            let entry = self.job_overrides.get_or_insert_with(BTreeMap::new);
            for (name, spec) in overrides {
                match entry.remove(name) {
                    Some(existing) => {
                        entry.insert(name.clone(), existing.apply(spec));
                    }
                    None => {
                        entry.insert(name.clone(), spec.clone());
                    }
                }
            }
        }
        self
    }

    /// Validate and finalize this spec into a [`Device`] named `name`.
    ///
    /// `known_jobs` is the set of job names present in the catalog;
    /// override keys not found there are a validation error.
    pub fn finalize(&self, name: &str, known_jobs: &BTreeSet<String>) -> Result<Device, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let host = self.host.clone().unwrap_or_else(|| name.to_string());
        let protocol = self.protocol.clone().unwrap_or_default();
        let tags = self.tags.clone().unwrap_or_default();

        let credentials = match &self.credentials {
            Some(c) => Some(c.clone()),
            None => {
                errors.push(ValidationError::new(name, "device has no credentials"));
                None
            }
        };

        let overrides = self.job_overrides.clone().unwrap_or_default();
        for job_name in overrides.keys() {
            if !known_jobs.contains(job_name) {
                errors.push(ValidationError::new(
                    name,
                    format!("job override '{job_name}' does not reference a known job"),
                ));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Device {
            name: name.to_string(),
            host,
            protocol,
            tags,
            credentials: credentials.expect("checked above"),
            job_overrides: overrides,
        })
    }
}

impl Device {
    /// Resolve the job this device runs for binding `job`, applying any
    /// per-device override and then device-level template substitution.
    pub fn effective_job(&self, job: &Job) -> Result<Job, Vec<ValidationError>> {
        let resolved = match self.job_overrides.get(&job.name) {
            Some(overlay) => apply_override(job, overlay)?,
            None => job.clone(),
        };
        // `resolved.template` already has any device-level override merged
        // in by `apply_override`; re-running substitution with an empty
        // overlay performs the `{{key}}` expansion pass using that merged
        // map.
        Ok(resolved.with_template(&BTreeMap::new()))
    }
}

fn apply_override(job: &Job, overlay: &JobSpec) -> Result<Job, Vec<ValidationError>> {
    use crate::job::{CommandSet, JobVariant};

    let mut variant = job.variant.clone();
    if let Some(cs) = &overlay.command_set {
        variant = match variant {
            JobVariant::CommandSet(mut existing) => {
                existing.steps.extend(cs.iter().cloned());
                JobVariant::CommandSet(existing)
            }
            JobVariant::FileSet(_) => JobVariant::CommandSet(CommandSet { steps: cs.clone() }),
        };
    }
    if let Some(fs) = &overlay.file_set {
        variant = match variant {
            JobVariant::FileSet(mut existing) => {
                for (path, entry) in fs {
                    existing.files.insert(path.clone(), entry.clone());
                }
                JobVariant::FileSet(existing)
            }
            JobVariant::CommandSet(_) => JobVariant::FileSet(crate::job::FileSet { files: fs.clone() }),
        };
    }

    let schedule = match &overlay.schedule {
        Some(expr) => crate::schedule::Schedule::compile(expr)
            .map_err(|e| vec![ValidationError::new(&job.name, e.message)])?,
        None => job.schedule.clone(),
    };

    let mut scrubbers = job.scrubbers.clone();
    if let Some(scr) = &overlay.scrubbers {
        scrubbers.extend(scr.iter().cloned());
    }

    let mut template = job.template.clone();
    if let Some(tpl) = &overlay.template {
        for (k, v) in tpl {
            template.insert(k.clone(), v.clone());
        }
    }

    Ok(Job {
        name: job.name.clone(),
        variant,
        schedule,
        scrubbers,
        template,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;

    fn sample_job() -> Job {
        JobSpec {
            schedule: Some("0 * * * * * *".into()),
            command_set: Some(vec![]),
            ..Default::default()
        }
        .finalize("show")
        .unwrap()
    }

    #[test]
    fn finalize_defaults_host_to_name() {
        let spec = DeviceSpec {
            credentials: Some(Credentials {
                user: "admin".into(),
                password: "hunter2".into(),
            }),
            ..Default::default()
        };
        let device = spec.finalize("router1", &BTreeSet::new()).unwrap();
        assert_eq!(device.host, "router1");
    }

    #[test]
    fn finalize_requires_credentials() {
        let spec = DeviceSpec::default();
        let errors = spec.finalize("router1", &BTreeSet::new()).unwrap_err();
        assert!(errors.iter().any(|e| e.reason.contains("credentials")));
    }

    #[test]
    fn finalize_rejects_unknown_job_override() {
        let spec = DeviceSpec {
            credentials: Some(Credentials {
                user: "admin".into(),
                password: "x".into(),
            }),
            job_overrides: Some(BTreeMap::from([("ghost".to_string(), JobSpec::default())])),
            ..Default::default()
        };
        let errors = spec.finalize("router1", &BTreeSet::new()).unwrap_err();
        assert!(errors.iter().any(|e| e.reason.contains("ghost")));
    }

    #[test]
    fn effective_job_applies_device_template_override() {
        let mut job = sample_job();
        job.template.insert("mode".into(), "job-level".into());

        let spec = DeviceSpec {
            credentials: Some(Credentials {
                user: "admin".into(),
                password: "x".into(),
            }),
            job_overrides: Some(BTreeMap::from([(
                "show".to_string(),
                JobSpec {
                    template: Some(BTreeMap::from([("mode".into(), "device-level".into())])),
                    ..Default::default()
                },
            )])),
            ..Default::default()
        };
        let device = spec
            .finalize("router1", &BTreeSet::from(["show".to_string()]))
            .unwrap();

        let effective = device.effective_job(&job).unwrap();
        assert_eq!(effective.template.get("mode").map(String::as_str), Some("device-level"));
    }
}
