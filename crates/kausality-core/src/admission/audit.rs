//! Audit annotation keys and the monotonic audit trail.
//!
//! Audit annotations land in the platform's audit log, not on the object.
//! Population is monotonic: a field is set as soon as the pipeline
//! determines it, and once set it is never overwritten, so an early return
//! (such as a freeze denial) leaves exactly the fields determined up to
//! that point.

use std::collections::BTreeMap;

/// Final decision: `allowed`, `denied`, or `allowed-with-warning`.
pub const AUDIT_DECISION: &str = "kausality.io/decision";

/// Whether drift was detected: `true` or `false`.
pub const AUDIT_DRIFT: &str = "kausality.io/drift";

/// Effective mode: `log` or `enforce`. Absent when denied by freeze, which
/// runs before mode resolution.
pub const AUDIT_MODE: &str = "kausality.io/mode";

/// Parent lifecycle phase, when a parent was resolved.
pub const AUDIT_LIFECYCLE_PHASE: &str = "kausality.io/lifecycle-phase";

/// Drift resolution: `approved`, `rejected`, or `unresolved`. Only set when
/// drift is true.
pub const AUDIT_DRIFT_RESOLUTION: &str = "kausality.io/drift-resolution";

/// The computed causal trace, echoed as JSON.
pub const AUDIT_TRACE: &str = "kausality.io/trace";

/// Monotonic audit annotation collector.
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    fields: BTreeMap<String, String>,
}

impl AuditTrail {
    /// Creates an empty trail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` unless already set.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.fields.entry(key.to_owned()).or_insert_with(|| value.into());
    }

    /// The recorded value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Consumes the trail into the response annotation map.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.fields
    }
}

/// The decision value for an allowed response: warnings imply
/// `allowed-with-warning`.
#[must_use]
pub fn allowed_decision(warnings: &[String]) -> &'static str {
    if warnings.is_empty() {
        "allowed"
    } else {
        "allowed-with-warning"
    }
}
