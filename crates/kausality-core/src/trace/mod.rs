//! Causal trace propagation.
//!
//! Every allowed mutation is stamped with a trace linking it back to the
//! human intent that started the chain. A trace is an ordered sequence of
//! hops persisted as a single JSON annotation; it is either extended from
//! the parent's trace (the controller reconciling a parent change) or
//! restarted as a fresh one-hop origin (a new causal origin: a user edit, a
//! stable-parent write, or an unattributable actor).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::annotations;
use crate::drift::{ParentState, identify_controller};
use crate::identity::HashList;
use crate::object::Object;

/// Upper bound on hops kept in a trace; the oldest hops are dropped first.
pub const MAX_TRACE_HOPS: usize = 64;

/// One element of a causal trace: who touched which object at which
/// generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceHop {
    /// API version of the subject.
    #[serde(default)]
    pub api_version: String,
    /// Kind of the subject.
    #[serde(default)]
    pub kind: String,
    /// Name of the subject.
    #[serde(default)]
    pub name: String,
    /// Generation of the subject at the time of the hop.
    #[serde(default)]
    pub generation: i64,
    /// Principal that performed the mutation.
    #[serde(default)]
    pub user: String,
    /// RFC-3339 UTC instant of the hop.
    #[serde(default)]
    pub timestamp: String,
    /// Free-form labels harvested from `kausality.io/trace-*` annotations
    /// on the subject, keyed by the suffix after the prefix.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl TraceHop {
    fn same_subject(&self, other: &Self) -> bool {
        self.api_version == other.api_version
            && self.kind == other.kind
            && self.name == other.name
            && self.generation == other.generation
            && self.user == other.user
    }
}

/// An ordered, finite sequence of trace hops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace(Vec<TraceHop>);

impl Trace {
    /// A fresh one-hop origin.
    #[must_use]
    pub fn origin(hop: TraceHop) -> Self {
        Self(vec![hop])
    }

    /// Parses the JSON annotation form. Malformed input yields `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// Serialises to the JSON annotation form.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".to_owned())
    }

    /// Appends a hop, collapsing a duplicate of the last hop (same subject,
    /// generation, and principal) and enforcing [`MAX_TRACE_HOPS`].
    pub fn push(&mut self, hop: TraceHop) {
        if self.0.last().is_some_and(|last| last.same_subject(&hop)) {
            return;
        }
        self.0.push(hop);
        if self.0.len() > MAX_TRACE_HOPS {
            let excess = self.0.len() - MAX_TRACE_HOPS;
            self.0.drain(..excess);
        }
    }

    /// The hops in order.
    #[must_use]
    pub fn hops(&self) -> &[TraceHop] {
        &self.0
    }

    /// Number of hops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the trace has no hops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decides whether the child starts a fresh trace.
///
/// The child is an origin when any of these hold: it has no controlling
/// parent; the principal is determined not to be the controller; the
/// parent's observed generation is present and equals its generation (a
/// stable-parent write is semantically a new origin); or the parent has an
/// observed generation but the principal cannot be cross-validated as the
/// controller. Otherwise the mutation is one hop in the parent's chain.
#[must_use]
pub fn is_origin(parent: Option<&ParentState>, principal: &str, child_updaters: &HashList) -> bool {
    let Some(parent) = parent else {
        return true;
    };

    let identity = identify_controller(parent, principal, child_updaters);
    if identity.can_determine && !identity.is_controller {
        return true;
    }
    match parent.observed_generation {
        Some(observed) if observed == parent.generation => true,
        Some(_) if !identity.can_determine => true,
        _ => false,
    }
}

/// Computes the trace to stamp onto a mutated child.
///
/// On extension, the parent's own trace annotation seeds the chain; a parent
/// without one contributes a synthesized hop at its current generation.
#[must_use]
pub fn propagate(
    child: &Object,
    parent: Option<&ParentState>,
    principal: &str,
    child_updaters: &HashList,
    now: DateTime<Utc>,
) -> Trace {
    let child_hop = child_hop(child, principal, now);

    if is_origin(parent, principal, child_updaters) {
        return Trace::origin(child_hop);
    }

    // Not an origin implies a resolved parent.
    let parent = parent.expect("extension requires a parent");
    let mut trace = parent
        .annotation(annotations::TRACE)
        .and_then(Trace::parse)
        .unwrap_or_else(|| Trace::origin(parent_hop(parent, principal, now)));
    trace.push(child_hop);
    trace
}

fn child_hop(child: &Object, principal: &str, now: DateTime<Utc>) -> TraceHop {
    // Markers can arrive as labels or annotations; annotations win on
    // duplicate suffixes.
    let labels = child.labels();
    let annotations = child.annotations();
    TraceHop {
        api_version: child.api_version().to_owned(),
        kind: child.kind().to_owned(),
        name: child.name().to_owned(),
        generation: child.generation(),
        user: principal.to_owned(),
        timestamp: format_timestamp(now),
        labels: harvest_labels(labels.iter().chain(annotations.iter())),
    }
}

fn parent_hop(parent: &ParentState, principal: &str, now: DateTime<Utc>) -> TraceHop {
    TraceHop {
        api_version: parent.reference.api_version.clone(),
        kind: parent.reference.kind.clone(),
        name: parent.reference.name.clone(),
        generation: parent.generation,
        user: principal.to_owned(),
        timestamp: format_timestamp(now),
        labels: harvest_labels(parent.annotations.iter()),
    }
}

fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn harvest_labels<'a>(
    annotations: impl Iterator<Item = (&'a String, &'a String)>,
) -> BTreeMap<String, String> {
    annotations
        .filter_map(|(k, v)| {
            k.strip_prefix(annotations::TRACE_LABEL_PREFIX)
                .map(|suffix| (suffix.to_owned(), v.clone()))
        })
        .collect()
}
