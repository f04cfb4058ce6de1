//! Approval and rejection matching, and the freeze switch.
//!
//! Users and policy tooling record explicit allow/deny entries as JSON
//! annotations on a parent; the core only reads them. A drift that matches
//! an approval is admitted, a drift that matches a rejection is denied, and
//! a rejection always wins when both match. A freeze on the parent denies
//! every child mutation outright, drift or not.

use serde::{Deserialize, Serialize};

use crate::annotations;
use crate::drift::ParentState;

/// Validity mode of an approval entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Valid only while the parent's generation equals the entry's.
    Once,
    /// Same contract as `once`; the spelling users reach for when they think
    /// in generations rather than events.
    Generation,
    /// Valid at any parent generation.
    Always,
}

/// One approval entry from the parent's `kausality.io/approvals` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    /// API version of the approved child.
    #[serde(default)]
    pub api_version: String,
    /// Kind of the approved child.
    pub kind: String,
    /// Name of the approved child; `"*"` matches any name.
    pub name: String,
    /// Parent generation the entry was issued against.
    #[serde(default)]
    pub generation: i64,
    /// Validity mode.
    pub mode: ApprovalMode,
}

/// One rejection entry from the parent's `kausality.io/rejections`
/// annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// API version of the rejected child.
    #[serde(default)]
    pub api_version: String,
    /// Kind of the rejected child.
    pub kind: String,
    /// Name of the rejected child; `"*"` matches any name.
    pub name: String,
    /// Parent generation the entry applies to; 0 means any generation.
    #[serde(default)]
    pub generation: i64,
    /// Human-readable reason surfaced in denials.
    #[serde(default)]
    pub reason: String,
}

/// Freeze marker from the parent's `kausality.io/freeze` annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freeze {
    /// Principal that set the freeze.
    #[serde(default)]
    pub user: String,
    /// Message surfaced in every denial while the freeze holds.
    #[serde(default)]
    pub message: String,
}

impl Freeze {
    /// Parses the freeze annotation from a parent, if set. Malformed JSON is
    /// ignored.
    #[must_use]
    pub fn from_parent(parent: &ParentState) -> Option<Self> {
        let raw = parent.annotation(annotations::FREEZE)?;
        match serde_json::from_str(raw) {
            Ok(freeze) => Some(freeze),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed freeze annotation");
                None
            }
        }
    }
}

/// Result of matching a drifted child against the parent's entries.
#[derive(Debug, Clone, Default)]
pub struct ApprovalCheck {
    /// True when a valid approval matched and no rejection did.
    pub approved: bool,
    /// True when a rejection matched.
    pub rejected: bool,
    /// Human-readable resolution, surfaced in audit trails and denials.
    pub reason: String,
    /// The approval entry that matched, when approved.
    pub matched_approval: Option<Approval>,
    /// The rejection entry that matched, when rejected.
    pub matched_rejection: Option<Rejection>,
}

/// Matches a child against the approval and rejection entries on its parent.
///
/// Rejection wins over approval. Approval entries with mode `once` or
/// `generation` only match while the parent's generation equals the entry's;
/// `always` matches any. Rejection entries with a non-zero generation only
/// match that generation.
#[must_use]
pub fn check(parent: &ParentState, child_kind: &str, child_name: &str) -> ApprovalCheck {
    check_annotations(
        parent.annotation(annotations::APPROVALS),
        parent.annotation(annotations::REJECTIONS),
        child_kind,
        child_name,
        parent.generation,
    )
}

/// Annotation-level matcher, usable without a resolved [`ParentState`].
#[must_use]
pub fn check_annotations(
    approvals_raw: Option<&str>,
    rejections_raw: Option<&str>,
    child_kind: &str,
    child_name: &str,
    parent_generation: i64,
) -> ApprovalCheck {
    let approvals: Vec<Approval> = parse_entries(approvals_raw, annotations::APPROVALS);
    let rejections: Vec<Rejection> = parse_entries(rejections_raw, annotations::REJECTIONS);

    for rejection in rejections {
        if !name_matches(&rejection.kind, &rejection.name, child_kind, child_name) {
            continue;
        }
        if rejection.generation != 0 && rejection.generation != parent_generation {
            continue;
        }
        let reason = if rejection.reason.is_empty() {
            format!("rejected for {child_kind}/{child_name}")
        } else {
            rejection.reason.clone()
        };
        return ApprovalCheck {
            rejected: true,
            reason,
            matched_rejection: Some(rejection),
            ..ApprovalCheck::default()
        };
    }

    for approval in approvals {
        if !name_matches(&approval.kind, &approval.name, child_kind, child_name) {
            continue;
        }
        let valid = match approval.mode {
            ApprovalMode::Once | ApprovalMode::Generation => {
                approval.generation == parent_generation
            }
            ApprovalMode::Always => true,
        };
        if !valid {
            continue;
        }
        return ApprovalCheck {
            approved: true,
            reason: format!(
                "approved for {child_kind}/{child_name} at parent generation {parent_generation}"
            ),
            matched_approval: Some(approval),
            ..ApprovalCheck::default()
        };
    }

    ApprovalCheck::default()
}

fn parse_entries<T: serde::de::DeserializeOwned>(raw: Option<&str>, key: &str) -> Vec<T> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(annotation = key, error = %err, "ignoring malformed entry list");
            Vec::new()
        }
    }
}

fn name_matches(entry_kind: &str, entry_name: &str, child_kind: &str, child_name: &str) -> bool {
    entry_kind == child_kind && (entry_name == "*" || entry_name == child_name)
}
