// SPDX-License-Identifier: MIT OR Apache-2.0
//! Catalog assembly: turns raw generic/specific overlays into a validated,
//! read-only catalog of jobs, devices, and (device, job) bindings.

use std::collections::BTreeMap;

use crate::device::{Device, DeviceSpec};
use crate::job::{Job, JobSpec};
use crate::validate::ValidationError;

/// Assemble the catalog's job entries against their generics.
///
/// Errors from every entity are collected and returned together; no
/// partial catalog is returned on failure.
pub fn assemble_jobs(
    generics: &BTreeMap<String, JobSpec>,
    entries: &BTreeMap<String, JobSpec>,
) -> Result<BTreeMap<String, Job>, Vec<ValidationError>> {
    let mut jobs = BTreeMap::new();
    let mut errors = Vec::new();
    for (name, entry) in entries {
        match assemble_job(name, entry, generics) {
            Ok(job) => {
                jobs.insert(name.clone(), job);
            }
            Err(mut e) => errors.append(&mut e),
        }
    }
    if errors.is_empty() {
        Ok(jobs)
    } else {
        Err(errors)
    }
}

fn assemble_job(
    name: &str,
    entry: &JobSpec,
    generics: &BTreeMap<String, JobSpec>,
) -> Result<Job, Vec<ValidationError>> {
    let mut assembled = JobSpec::default();
    if let Some(generic_name) = &entry.generic {
        match generics.get(generic_name) {
            Some(g) => assembled = assembled.apply(g),
            None => {
                return Err(vec![ValidationError::new(
                    name,
                    format!("unknown generic '{generic_name}'"),
                )])
            }
        }
    } else if let Some(default_generic) = generics.get("default") {
        assembled = assembled.apply(default_generic);
    }
    assembled = assembled.apply(entry);
    assembled.finalize(name)
}

/// Assemble the catalog's device entries against their generics.
///
/// `known_jobs` restricts which job names a device's overrides may
/// reference — it must be the name set of an already-assembled job
/// catalog.
pub fn assemble_devices(
    generics: &BTreeMap<String, DeviceSpec>,
    entries: &BTreeMap<String, DeviceSpec>,
    known_jobs: &std::collections::BTreeSet<String>,
) -> Result<BTreeMap<String, Device>, Vec<ValidationError>> {
    let mut devices = BTreeMap::new();
    let mut errors = Vec::new();
    for (name, entry) in entries {
        let mut assembled = DeviceSpec::default();
        if let Some(generic_name) = &entry.generic {
            match generics.get(generic_name) {
                Some(g) => assembled = assembled.apply(g),
                None => {
                    errors.push(ValidationError::new(
                        name,
                        format!("unknown generic '{generic_name}'"),
                    ));
                    continue;
                }
            }
        } else if let Some(default_generic) = generics.get("default") {
            assembled = assembled.apply(default_generic);
        }
        assembled = assembled.apply(entry);
        match assembled.finalize(name, known_jobs) {
            Ok(device) => {
                devices.insert(name.clone(), device);
            }
            Err(mut e) => errors.append(&mut e),
        }
    }
    if errors.is_empty() {
        Ok(devices)
    } else {
        Err(errors)
    }
}

/// A fully assembled, read-only catalog of jobs and devices.
///
/// Construct via [`Catalog::assemble`]; once built, immutable for the
/// lifetime of the process — there is no live reconfiguration.
#[derive(Clone, Debug)]
pub struct Catalog {
    jobs: BTreeMap<String, Job>,
    devices: BTreeMap<String, Device>,
}

impl Catalog {
    /// Assemble jobs, then devices against them, aggregating every
    /// validation error across both passes before failing.
    pub fn assemble(
        job_generics: &BTreeMap<String, JobSpec>,
        job_entries: &BTreeMap<String, JobSpec>,
        device_generics: &BTreeMap<String, DeviceSpec>,
        device_entries: &BTreeMap<String, DeviceSpec>,
    ) -> Result<Catalog, Vec<ValidationError>> {
        let jobs = assemble_jobs(job_generics, job_entries);
        let known_jobs: std::collections::BTreeSet<String> = jobs
            .as_ref()
            .map(|j| j.keys().cloned().collect())
            .unwrap_or_default();
        let devices = assemble_devices(device_generics, device_entries, &known_jobs);

        match (jobs, devices) {
            (Ok(jobs), Ok(devices)) => Ok(Catalog { jobs, devices }),
            (jobs, devices) => {
                let mut errors = Vec::new();
                if let Err(e) = jobs {
                    errors.extend(e);
                }
                if let Err(e) = devices {
                    errors.extend(e);
                }
                Err(errors)
            }
        }
    }

    /// All jobs in the catalog, by name.
    pub fn jobs(&self) -> &BTreeMap<String, Job> {
        &self.jobs
    }

    /// All devices in the catalog, by name.
    pub fn devices(&self) -> &BTreeMap<String, Device> {
        &self.devices
    }

    /// The (device, job) bindings the scheduler operates on: one per
    /// entry in each device's job-override map, with the per-device
    /// override and template substitution already applied.
    ///
    /// A device's override map is what declares which jobs it runs;
    /// devices that never list a job never run it, even if the job exists
    /// in the catalog.
    pub fn bindings(&self) -> Result<Vec<(Device, Job)>, Vec<ValidationError>> {
        let mut out = Vec::new();
        let mut errors = Vec::new();
        for device in self.devices.values() {
            for job_name in device.job_overrides.keys() {
                // DeviceSpec::finalize already rejected override keys with
                // no matching catalog job, so this lookup cannot miss.
                let job = self.jobs.get(job_name).expect("validated at assembly time");
                match device.effective_job(job) {
                    Ok(effective) => out.push((device.clone(), effective)),
                    Err(mut e) => errors.append(&mut e),
                }
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(errors)
        }
    }
}
