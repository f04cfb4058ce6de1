//! Parent resolution.
//!
//! Given a child object, locate its controlling parent via the owner
//! reference carrying the controller flag and materialise the parent state
//! the rest of the pipeline consumes. Absence of a controller owner is a
//! first-class outcome, not an error; only store failures propagate.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::annotations;
use crate::identity::HashList;
use crate::object::{Condition, Object, ObjectRef, OwnerReference};
use crate::store::{ObjectStore, StoreError};

/// Parent state materialised once per admission.
#[derive(Debug, Clone, Default)]
pub struct ParentState {
    /// Reference to the parent, generation included.
    pub reference: ObjectRef,
    /// The parent's spec generation.
    pub generation: i64,
    /// Observed generation, resolved by precedence: top-level status field,
    /// then the largest per-condition value, then the synthetic annotation
    /// fallback. `None` when no level produced a value.
    pub observed_generation: Option<i64>,
    /// Whether the parent carries a deletion timestamp.
    pub deleting: bool,
    /// Whether the parent carries the `kausality.io/phase: initialized`
    /// marker.
    pub initialized: bool,
    /// Status conditions on the parent.
    pub conditions: Vec<Condition>,
    /// Hashes of principals that have modified the parent's spec.
    pub updaters: HashList,
    /// Hashes of principals that have written the parent's status
    /// subresource.
    pub controllers: HashList,
    /// All annotations on the parent. Approvals, rejections, freeze, snooze,
    /// and the parent's own trace are read from here so the parent is
    /// fetched exactly once per admission.
    pub annotations: BTreeMap<String, String>,
}

impl ParentState {
    /// The parent's annotation value under `key`, if present.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Resolves a child's controlling parent through the object store.
pub struct ParentResolver {
    store: Arc<dyn ObjectStore>,
}

impl ParentResolver {
    /// Creates a resolver over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Resolves the child's controlling parent.
    ///
    /// Returns `Ok(None)` when the child has no controller owner reference
    /// or the reference is stale (parent already gone).
    ///
    /// # Errors
    ///
    /// Propagates transient store failures; the admission path turns them
    /// into fatal admission errors.
    pub async fn resolve(&self, child: &Object) -> Result<Option<ParentState>, StoreError> {
        let Some(owner) = child.controller_owner() else {
            return Ok(None);
        };

        // Owner references never carry a namespace; owners live in the
        // child's namespace or are cluster-scoped.
        let namespace = child.namespace();
        let Some(parent) = self.store.get(&owner.kind, namespace, &owner.name).await? else {
            tracing::debug!(
                kind = %owner.kind,
                namespace = %namespace,
                name = %owner.name,
                "controller owner reference is stale, parent not found"
            );
            return Ok(None);
        };

        Ok(Some(extract_parent_state(&parent, &owner, namespace)))
    }
}

/// Extracts [`ParentState`] from a fetched parent object.
fn extract_parent_state(parent: &Object, owner: &OwnerReference, namespace: &str) -> ParentState {
    let annotations = parent.annotations();

    let observed_generation = parent
        .status_observed_generation()
        .or_else(|| {
            parent
                .conditions()
                .iter()
                .filter_map(|c| c.observed_generation)
                .max()
        })
        .or_else(|| {
            annotations
                .get(annotations::OBSERVED_GENERATION)
                .and_then(|v| v.parse::<i64>().ok())
        });

    let updaters = annotations
        .get(annotations::UPDATERS)
        .map(|v| HashList::parse(v))
        .unwrap_or_default();
    let controllers = annotations
        .get(annotations::CONTROLLERS)
        .map(|v| HashList::parse(v))
        .unwrap_or_default();
    let initialized = annotations
        .get(annotations::PHASE)
        .is_some_and(|v| v == annotations::PHASE_INITIALIZED);

    ParentState {
        reference: ObjectRef {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            namespace: namespace.to_owned(),
            name: owner.name.clone(),
            uid: owner.uid.clone(),
            generation: parent.generation(),
        },
        generation: parent.generation(),
        observed_generation,
        deleting: parent.deletion_timestamp().is_some(),
        initialized,
        conditions: parent.conditions(),
        updaters,
        controllers,
        annotations,
    }
}
