// SPDX-License-Identifier: MIT OR Apache-2.0
//! Jobs: command-sets, file-sets, scrubbers, and the generic/specific
//! assembly of a [`Job`] from a [`JobSpec`] overlay.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use netbackup_error::{ErrorCode, NetbackupError};

use crate::schedule::Schedule;
use crate::validate::ValidationError;

/// One step of a [`CommandSet`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CommandStep {
    /// The literal string transmitted to the session shell.
    pub command: String,
    /// Patterns, any of which signals success.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect: Vec<String>,
    /// Patterns, any of which signals failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect_not: Vec<String>,
    /// Seconds to wait for a match; `0` means proceed immediately.
    #[serde(default)]
    pub timeout: u64,
    /// Whether a newline is appended after `command`.
    #[serde(default = "default_implicit_enter")]
    pub implicit_enter: bool,
}

fn default_implicit_enter() -> bool {
    true
}

/// Anchors a pattern as a substring match: a pattern not anchored at the
/// start is prefixed with `.*`, and one not anchored at the end is
/// suffixed with `.*`.
pub fn sanitize_pattern(pattern: &str) -> String {
    let mut out = String::new();
    if !pattern.starts_with('^') {
        out.push_str(".*");
    }
    out.push_str(pattern);
    if !pattern.ends_with('$') {
        out.push_str(".*");
    }
    out
}

impl CommandStep {
    /// Compile the `expect` pattern list into substring-anchored regexes.
    pub fn compile_expect(&self) -> Result<Vec<Regex>, NetbackupError> {
        compile_patterns(&self.expect)
    }

    /// Compile the `expect_not` pattern list into substring-anchored
    /// regexes.
    pub fn compile_expect_not(&self) -> Result<Vec<Regex>, NetbackupError> {
        compile_patterns(&self.expect_not)
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, NetbackupError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&sanitize_pattern(p)).map_err(|e| {
                NetbackupError::new(ErrorCode::MalformedLiteral, format!("bad pattern: {e}"))
                    .with_context("pattern", p.clone())
            })
        })
        .collect()
}

/// An ordered list of command steps sent over an interactive shell
/// session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandSet {
    /// Steps, applied in order.
    pub steps: Vec<CommandStep>,
}

/// Optional decompression hint for a fetched file.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// The fetched bytes are gzip-compressed.
    Gzip,
}

/// One file entry in a [`FileSet`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    /// Decompression to apply after fetch, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
}

/// A set of files identified by absolute device paths.
///
/// Backed by a `BTreeMap` so iteration is always lexicographic by path,
/// matching the fetch-order requirement in the executor contract.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FileSet {
    /// Path → entry.
    pub files: BTreeMap<String, FileEntry>,
}

/// A captured-payload transformation, applied in declared order after
/// capture and before transmission to the controller.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scrubber {
    /// Replace every literal occurrence of `search` with `replace`.
    LiteralReplace {
        /// Exact substring to find.
        search: String,
        /// Replacement text.
        replace: String,
    },
    /// Replace every regex match of `search` with the literal `replace`
    /// text (no backreference expansion).
    RegexLiteralReplace {
        /// Regex pattern to match.
        search: String,
        /// Literal replacement text.
        replace: String,
    },
    /// Replace every regex match of `search` with `replace`, expanding
    /// `$1`-style backreferences.
    RegexSubstitution {
        /// Regex pattern to match.
        search: String,
        /// Replacement template, may reference capture groups.
        replace: String,
    },
}

impl Scrubber {
    /// Substitute `{{key}}` occurrences in this scrubber's search/replace
    /// fields using `template`.
    fn apply_template(&self, template: &BTreeMap<String, String>) -> Scrubber {
        match self {
            Scrubber::LiteralReplace { search, replace } => Scrubber::LiteralReplace {
                search: substitute(search, template),
                replace: substitute(replace, template),
            },
            Scrubber::RegexLiteralReplace { search, replace } => Scrubber::RegexLiteralReplace {
                search: substitute(search, template),
                replace: substitute(replace, template),
            },
            Scrubber::RegexSubstitution { search, replace } => Scrubber::RegexSubstitution {
                search: substitute(search, template),
                replace: substitute(replace, template),
            },
        }
    }

    /// Apply this scrubber to `payload`, returning the transformed bytes.
    ///
    /// On any regex compile failure, returns `Err` — callers must replace
    /// the payload with an empty byte string and mark the result failed,
    /// per the "never transmit un-scrubbed data" rule.
    pub fn apply(&self, payload: &[u8]) -> Result<Vec<u8>, NetbackupError> {
        let text = String::from_utf8_lossy(payload);
        let out = match self {
            Scrubber::LiteralReplace { search, replace } => text.replace(search.as_str(), replace),
            Scrubber::RegexLiteralReplace { search, replace } => {
                let re = Regex::new(search).map_err(regex_err(search))?;
                re.replace_all(&text, replace.replace('$', "$$").as_str())
                    .into_owned()
            }
            Scrubber::RegexSubstitution { search, replace } => {
                let re = Regex::new(search).map_err(regex_err(search))?;
                re.replace_all(&text, replace.as_str()).into_owned()
            }
        };
        Ok(out.into_bytes())
    }
}

fn regex_err(pattern: &str) -> impl Fn(regex::Error) -> NetbackupError + '_ {
    move |e| {
        NetbackupError::new(ErrorCode::MalformedLiteral, format!("bad scrubber pattern: {e}"))
            .with_context("pattern", pattern.to_string())
    }
}

fn substitute(text: &str, template: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in template {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Exactly one of these is content of a finalized [`Job`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum JobVariant {
    /// Interactive-shell command sequence.
    CommandSet(CommandSet),
    /// Raw-file fetch set.
    FileSet(FileSet),
}

/// A fully assembled, validated job. Read-only once built; deep-copied
/// per device binding so device-level template overrides never leak back
/// into the shared catalog entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Name, unique within the catalog.
    pub name: String,
    /// Command-set or file-set content.
    pub variant: JobVariant,
    /// Cadence on which this job fires.
    pub schedule: Schedule,
    /// Transforms applied to the captured payload, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scrubbers: Vec<Scrubber>,
    /// Template key → replacement string, applied after assembly.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template: BTreeMap<String, String>,
}

impl serde::Serialize for Schedule {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.expression())
    }
}

impl<'de> serde::Deserialize<'de> for Schedule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Schedule::compile(&s).map_err(serde::de::Error::custom)
    }
}

impl Job {
    /// Apply `template` substitution to every command string, expect
    /// pattern, and scrubber search/replace field, returning a new
    /// [`Job`]. The job's own `template` map is merged under `template`
    /// (caller-supplied values take precedence), matching the
    /// device-overrides-job-level rule.
    pub fn with_template(&self, template: &BTreeMap<String, String>) -> Job {
        let mut merged = self.template.clone();
        for (k, v) in template {
            merged.insert(k.clone(), v.clone());
        }

        let variant = match &self.variant {
            JobVariant::CommandSet(cs) => JobVariant::CommandSet(CommandSet {
                steps: cs
                    .steps
                    .iter()
                    .map(|step| CommandStep {
                        command: substitute(&step.command, &merged),
                        expect: step.expect.iter().map(|p| substitute(p, &merged)).collect(),
                        expect_not: step
                            .expect_not
                            .iter()
                            .map(|p| substitute(p, &merged))
                            .collect(),
                        timeout: step.timeout,
                        implicit_enter: step.implicit_enter,
                    })
                    .collect(),
            }),
            JobVariant::FileSet(fs) => JobVariant::FileSet(fs.clone()),
        };

        Job {
            name: self.name.clone(),
            variant,
            schedule: self.schedule.clone(),
            scrubbers: self
                .scrubbers
                .iter()
                .map(|s| s.apply_template(&merged))
                .collect(),
            template: merged,
        }
    }
}

/// Raw, partially-specified job overlay as it appears in configuration:
/// a default, a named generic, or a specific catalog entry.
///
/// `apply` implements the merge rule from the assembly contract:
/// non-default-valued fields overwrite, list fields append, maps merge
/// key-wise, and `schedule` replaces the whole.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    /// Name of the generic to inherit from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic: Option<String>,
    /// Command steps to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_set: Option<Vec<CommandStep>>,
    /// File entries to merge in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_set: Option<BTreeMap<String, FileEntry>>,
    /// Cadence expression text; replaces any inherited schedule whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Scrubbers to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrubbers: Option<Vec<Scrubber>>,
    /// Template entries to merge in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<BTreeMap<String, String>>,
}

impl JobSpec {
    /// Apply `overlay` on top of `self`, returning the merged spec. Never
    /// mutates `overlay`.
    pub fn apply(mut self, overlay: &JobSpec) -> JobSpec {
        if let Some(cs) = &overlay.command_set {
            match &mut self.command_set {
                Some(existing) => existing.extend(cs.iter().cloned()),
                None => self.command_set = Some(cs.clone()),
            }
        }
        if let Some(fs) = &overlay.file_set {
            let entry = self.file_set.get_or_insert_with(BTreeMap::new);
            for (path, file) in fs {
                entry.insert(path.clone(), file.clone());
            }
        }
        if let Some(sched) = &overlay.schedule {
            self.schedule = Some(sched.clone());
        }
        if let Some(scr) = &overlay.scrubbers {
            match &mut self.scrubbers {
                Some(existing) => existing.extend(scr.iter().cloned()),
                None => self.scrubbers = Some(scr.clone()),
            }
        }
        if let Some(tpl) = &overlay.template {
            let entry = self.template.get_or_insert_with(BTreeMap::new);
            for (k, v) in tpl {
                entry.insert(k.clone(), v.clone());
            }
        }
        self
    }

    /// Validate and finalize this spec into a [`Job`] named `name`.
    ///
    /// Returns every applicable reason at once rather than stopping at
    /// the first, so catalog-wide validation can aggregate across
    /// entities.
    pub fn finalize(&self, name: &str) -> Result<Job, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let variant = match (&self.command_set, &self.file_set) {
            (Some(cs), None) => {
                for step in cs {
                    if step.timeout == 0 && (!step.expect.is_empty() || !step.expect_not.is_empty())
                    {
                        errors.push(ValidationError::new(
                            name,
                            format!(
                                "command step '{}' has timeout=0 but non-empty expect list(s)",
                                step.command
                            ),
                        ));
                    }
                }
                Some(JobVariant::CommandSet(CommandSet { steps: cs.clone() }))
            }
            (None, Some(fs)) => Some(JobVariant::FileSet(FileSet { files: fs.clone() })),
            (None, None) => {
                errors.push(ValidationError::new(
                    name,
                    "job has neither a command_set nor a file_set",
                ));
                None
            }
            (Some(_), Some(_)) => {
                errors.push(ValidationError::new(
                    name,
                    "job has both a command_set and a file_set; exactly one is required",
                ));
                None
            }
        };

        let schedule = match &self.schedule {
            Some(expr) => match Schedule::compile(expr) {
                Ok(s) => Some(s),
                Err(e) => {
                    errors.push(ValidationError::new(name, e.message));
                    None
                }
            },
            None => {
                errors.push(ValidationError::new(name, "job has no schedule"));
                None
            }
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Job {
            name: name.to_string(),
            variant: variant.expect("checked above"),
            schedule: schedule.expect("checked above"),
            scrubbers: self.scrubbers.clone().unwrap_or_default(),
            template: self.template.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_anchors_both_ends_by_default() {
        assert_eq!(sanitize_pattern("foo"), ".*foo.*");
        assert_eq!(sanitize_pattern("^foo"), "^foo.*");
        assert_eq!(sanitize_pattern("foo$"), ".*foo$");
        assert_eq!(sanitize_pattern("^foo$"), "^foo$");
    }

    #[test]
    fn literal_scrubber_noop_without_match() {
        let s = Scrubber::LiteralReplace {
            search: "secret".into(),
            replace: "REDACTED".into(),
        };
        let out = s.apply(b"nothing to see here").unwrap();
        assert_eq!(out, b"nothing to see here");
    }

    #[test]
    fn literal_scrubber_replaces_all_occurrences() {
        let s = Scrubber::LiteralReplace {
            search: "multilink bundle-name authenticated".into(),
            replace: "multilink bundle-name {{mode}}".into(),
        };
        let out = s.apply(b"multilink bundle-name authenticated\n").unwrap();
        assert_eq!(out, b"multilink bundle-name {{mode}}\n");
    }

    #[test]
    fn regex_substitution_expands_backreferences() {
        let s = Scrubber::RegexSubstitution {
            search: r"password (\S+)".into(),
            replace: "password [redacted-$1-len]".into(),
        };
        let out = s.apply(b"password hunter2").unwrap();
        assert_eq!(out, b"password [redacted-hunter2-len]");
    }

    #[test]
    fn template_substitution_prefers_caller_values() {
        let job = JobSpec {
            command_set: None,
            file_set: None,
            generic: None,
            schedule: Some("0 * * * * * *".into()),
            scrubbers: Some(vec![Scrubber::LiteralReplace {
                search: "authenticated".into(),
                replace: "{{mode}}".into(),
            }]),
            template: Some(BTreeMap::from([("mode".into(), "job-level".into())])),
        }
        .finalize("multilink")
        .unwrap();

        let device_level =
            job.with_template(&BTreeMap::from([("mode".into(), "device-level".into())]));
        assert_eq!(
            device_level.template.get("mode").map(String::as_str),
            Some("device-level")
        );
    }

    #[test]
    fn finalize_rejects_neither_variant() {
        let spec = JobSpec {
            schedule: Some("0 * * * * * *".into()),
            ..Default::default()
        };
        let errors = spec.finalize("empty").unwrap_err();
        assert!(errors.iter().any(|e| e.reason.contains("neither")));
    }

    #[test]
    fn finalize_rejects_both_variants() {
        let spec = JobSpec {
            schedule: Some("0 * * * * * *".into()),
            command_set: Some(vec![]),
            file_set: Some(BTreeMap::new()),
            ..Default::default()
        };
        let errors = spec.finalize("both").unwrap_err();
        assert!(errors.iter().any(|e| e.reason.contains("both")));
    }

    #[test]
    fn finalize_rejects_zero_timeout_with_expect() {
        let spec = JobSpec {
            schedule: Some("0 * * * * * *".into()),
            command_set: Some(vec![CommandStep {
                command: "show version".into(),
                expect: vec!["OK".into()],
                expect_not: vec![],
                timeout: 0,
                implicit_enter: true,
            }]),
            ..Default::default()
        };
        let errors = spec.finalize("badstep").unwrap_err();
        assert!(errors.iter().any(|e| e.reason.contains("timeout=0")));
    }

    #[test]
    fn apply_appends_lists_and_merges_maps() {
        let base = JobSpec {
            command_set: Some(vec![CommandStep {
                command: "enable".into(),
                expect: vec![],
                expect_not: vec![],
                timeout: 5,
                implicit_enter: true,
            }]),
            template: Some(BTreeMap::from([("a".into(), "1".into())])),
            ..Default::default()
        };
        let overlay = JobSpec {
            command_set: Some(vec![CommandStep {
                command: "show run".into(),
                expect: vec![],
                expect_not: vec![],
                timeout: 5,
                implicit_enter: true,
            }]),
            template: Some(BTreeMap::from([("b".into(), "2".into())])),
            ..Default::default()
        };
        let merged = base.apply(&overlay);
        assert_eq!(merged.command_set.unwrap().len(), 2);
        let tpl = merged.template.unwrap();
        assert_eq!(tpl.get("a").map(String::as_str), Some("1"));
        assert_eq!(tpl.get("b").map(String::as_str), Some("2"));
    }
}
