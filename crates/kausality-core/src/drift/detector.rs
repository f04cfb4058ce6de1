//! Drift heuristics.
//!
//! The detector answers one question per admission: is this mutation the
//! owning controller writing a child while the parent is stable? Controller
//! identity is inferred from the intersection of hash lists recorded on the
//! child and its parent, never from configuration: a principal that writes
//! both the child's spec and the parent's status is, by construction, the
//! controller.

use std::sync::Arc;

use super::lifecycle::{LifecyclePhase, classify_phase};
use super::resolver::{ParentResolver, ParentState};
use crate::identity::{HashList, hash_principal};
use crate::object::Object;
use crate::store::{ObjectStore, StoreError};

/// Outcome of controller identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerIdentity {
    /// Whether the requesting principal is the owning controller.
    pub is_controller: bool,
    /// Whether the hash evidence was sufficient to decide at all. Callers
    /// are lenient when this is false.
    pub can_determine: bool,
}

/// Result of running the drift heuristics for one admission.
#[derive(Debug, Clone, Default)]
pub struct DriftAssessment {
    /// True when the mutation is drift.
    pub drift: bool,
    /// Human-readable explanation, surfaced in warnings, audit trails, and
    /// notifications.
    pub reason: String,
    /// Parent lifecycle phase, when a parent was resolved.
    pub phase: Option<LifecyclePhase>,
    /// The resolved parent state, when one exists.
    pub parent: Option<ParentState>,
    /// Controller identity, when identification ran.
    pub identity: Option<ControllerIdentity>,
}

impl DriftAssessment {
    fn no_drift(reason: impl Into<String>) -> Self {
        Self {
            drift: false,
            reason: reason.into(),
            ..Self::default()
        }
    }
}

/// Decides whether the requesting principal is the parent's owning
/// controller, given only hash lists.
///
/// `child_updaters` is the child's updater list as recorded *before* the
/// mutation under decision.
#[must_use]
pub fn identify_controller(
    parent: &ParentState,
    principal: &str,
    child_updaters: &HashList,
) -> ControllerIdentity {
    let principal_hash = hash_principal(principal);

    // The parent's controllers list is written on status-subresource
    // admissions; when present it cross-validates the child's updaters.
    if !parent.controllers.is_empty() {
        if !child_updaters.is_empty() {
            let intersection = child_updaters.intersect(&parent.controllers);
            if !intersection.is_empty() {
                return ControllerIdentity {
                    is_controller: intersection.contains(&principal_hash),
                    can_determine: true,
                };
            }
            // No intersection: every recorded child updater is a
            // non-controller.
            return ControllerIdentity {
                is_controller: parent.controllers.contains(&principal_hash),
                can_determine: true,
            };
        }
        // No child updaters yet (CREATE).
        return ControllerIdentity {
            is_controller: parent.controllers.contains(&principal_hash),
            can_determine: true,
        };
    }

    // No controllers recorded: fall back to the child updater heuristic.
    match child_updaters.len() {
        1 => ControllerIdentity {
            is_controller: child_updaters.first() == Some(principal_hash.as_str()),
            can_determine: true,
        },
        // First writer is by construction the creator.
        0 => ControllerIdentity {
            is_controller: true,
            can_determine: true,
        },
        _ => ControllerIdentity {
            is_controller: false,
            can_determine: false,
        },
    }
}

/// Runs parent resolution, lifecycle classification, controller
/// identification, and the generation comparison for one admission.
pub struct Detector {
    resolver: ParentResolver,
}

impl Detector {
    /// Creates a detector over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            resolver: ParentResolver::new(store),
        }
    }

    /// Classifies a mutation of `child` by `principal`.
    ///
    /// `child_updaters` is the child's updater-hash list before this
    /// mutation (from the old object on UPDATE and DELETE, empty on
    /// CREATE).
    ///
    /// # Errors
    ///
    /// Propagates store failures from parent resolution; the admission path
    /// turns them into fatal admission errors.
    pub async fn detect(
        &self,
        child: &Object,
        principal: &str,
        child_updaters: &HashList,
    ) -> Result<DriftAssessment, StoreError> {
        let Some(parent) = self.resolver.resolve(child).await? else {
            return Ok(DriftAssessment::no_drift("no controller owner reference"));
        };

        let phase = classify_phase(&parent);
        let mut assessment = DriftAssessment {
            phase: Some(phase),
            ..DriftAssessment::default()
        };

        match phase {
            LifecyclePhase::Deleting => {
                assessment.reason = "parent is being deleted (cleanup phase)".to_owned();
                assessment.parent = Some(parent);
                return Ok(assessment);
            }
            LifecyclePhase::Initializing => {
                assessment.reason = "parent is initializing".to_owned();
                assessment.parent = Some(parent);
                return Ok(assessment);
            }
            LifecyclePhase::Initialized => {}
        }

        let identity = identify_controller(&parent, principal, child_updaters);
        assessment.identity = Some(identity);

        if !identity.can_determine {
            assessment.reason =
                "cannot determine controller identity (multiple updaters, no parent controllers annotation)"
                    .to_owned();
            assessment.parent = Some(parent);
            return Ok(assessment);
        }
        if !identity.is_controller {
            assessment.reason = format!(
                "change by different actor (hash {})",
                hash_principal(principal)
            );
            assessment.parent = Some(parent);
            return Ok(assessment);
        }

        let generation = parent.generation;
        let observed = parent.observed_generation;
        assessment.parent = Some(parent);

        match observed {
            Some(observed) if observed == generation => {
                assessment.drift = true;
                assessment.reason = format!(
                    "drift detected: parent generation ({generation}) == observedGeneration ({observed})"
                );
            }
            _ => {
                assessment.reason = format!(
                    "parent reconciling: generation ({generation}) != observedGeneration ({})",
                    observed.unwrap_or(0)
                );
            }
        }

        Ok(assessment)
    }
}
