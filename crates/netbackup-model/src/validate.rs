// SPDX-License-Identifier: MIT OR Apache-2.0
//! Catalog-wide validation error aggregation.

use std::fmt;

/// One reason a single catalog entity failed validation.
///
/// Catalog validation collects every entity's errors rather than stopping
/// at the first, so a misconfigured fleet reports everything wrong with
/// it in one pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Name of the entity (job or device) this error applies to.
    pub entity: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ValidationError {
    /// Create a new validation error for `entity`.
    pub fn new(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.reason)
    }
}

/// Joins every [`ValidationError`] collected while assembling a catalog
/// into one message, so the error contains every invalid entity's reason.
pub fn join(errors: &[ValidationError]) -> String {
    let mut out = format!("{} invalid catalog entit{}:\n", errors.len(), if errors.len() == 1 { "y" } else { "ies" });
    for err in errors {
        out.push_str("  - ");
        out.push_str(&err.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_contains_every_reason() {
        let errors = vec![
            ValidationError::new("job1", "unknown generic 'missing'"),
            ValidationError::new("device1", "duplicate entity name"),
        ];
        let msg = join(&errors);
        assert!(msg.contains("job1"));
        assert!(msg.contains("unknown generic"));
        assert!(msg.contains("device1"));
        assert!(msg.contains("duplicate entity name"));
    }
}
