//! Lifecycle classification.
//!
//! Drift heuristics only apply to parents that have finished initializing
//! and are not being torn down; this classifier decides which regime a
//! parent is in. It is pure: all inputs come from the materialised
//! [`ParentState`].

use std::fmt;

use super::resolver::ParentState;

/// Lifecycle phase of a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// The parent has not yet been observed by its controller.
    Initializing,
    /// The parent has been reconciled at least once.
    Initialized,
    /// The parent carries a deletion timestamp.
    Deleting,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initializing => "Initializing",
            Self::Initialized => "Initialized",
            Self::Deleting => "Deleting",
        })
    }
}

/// Classifies a parent's lifecycle phase.
///
/// A parent is `Initialized` when any of these hold: the phase annotation is
/// set, an `Initialized` or `Ready` condition is true, or an observed
/// generation was discovered at any precedence level.
#[must_use]
pub fn classify_phase(parent: &ParentState) -> LifecyclePhase {
    if parent.deleting {
        return LifecyclePhase::Deleting;
    }

    let condition_initialized = parent
        .conditions
        .iter()
        .any(|c| (c.kind == "Initialized" || c.kind == "Ready") && c.is_true());

    if parent.initialized || condition_initialized || parent.observed_generation.is_some() {
        return LifecyclePhase::Initialized;
    }

    LifecyclePhase::Initializing
}
