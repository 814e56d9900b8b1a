// SPDX-License-Identifier: MIT OR Apache-2.0
//! Path layouts under which the persistence pipeline writes results.

use serde::{Deserialize, Serialize};

/// Where a result gets written, relative to the backing repository root.
/// Configuration selects any non-empty subset.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    /// `by_device/<device>/<job>`
    ByDevice,
    /// `by_job/<job>/<device>`
    ByJob,
}

impl Structure {
    /// Relative file path for one result under this layout.
    pub fn path_for(&self, device: &str, job: &str) -> String {
        match self {
            Structure::ByDevice => format!("by_device/{device}/{job}"),
            Structure::ByJob => format!("by_job/{job}/{device}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_device_nests_job_under_device() {
        assert_eq!(Structure::ByDevice.path_for("router1", "show"), "by_device/router1/show");
    }

    #[test]
    fn by_job_nests_device_under_job() {
        assert_eq!(Structure::ByJob.path_for("router1", "show"), "by_job/show/router1");
    }
}
