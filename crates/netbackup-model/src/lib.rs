// SPDX-License-Identifier: MIT OR Apache-2.0
//! Data model for netbackup: schedules, jobs, devices, executions, and
//! the generic/specific assembly that turns raw configuration into a
//! validated, read-only catalog.
//!
//! Assembly follows a fixed merge order — default, then a named (or
//! implicit `default`) generic, then the specific entry — and aggregates
//! every validation failure across the whole catalog rather than
//! stopping at the first, so a misconfigured fleet reports everything
//! wrong with it in one pass.

pub mod assembly;
pub mod device;
pub mod execution;
pub mod job;
pub mod layout;
pub mod schedule;
pub mod validate;

pub use assembly::Catalog;
pub use device::{Credentials, Device, DeviceSpec, Protocol};
pub use execution::{Execution, ExecutionResult, Outcome};
pub use job::{CommandSet, CommandStep, Compression, FileEntry, FileSet, Job, JobSpec, JobVariant, Scrubber};
pub use layout::Structure;
pub use schedule::Schedule;
pub use validate::ValidationError;
