//! Admission request and response shapes.
//!
//! These are the core's boundary types. The webhook scaffolding (out of
//! scope here) translates the platform's admission-review envelope into an
//! [`AdmissionRequest`] and the returned [`AdmissionResponse`] back out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object::Object;

/// Mutation operation carried by an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Object creation.
    Create,
    /// Object update.
    Update,
    /// Object deletion.
    Delete,
    /// Anything else (CONNECT and friends); passed through unprocessed.
    #[serde(other)]
    Other,
}

impl Operation {
    /// The wire spelling of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Other => "OTHER",
        }
    }
}

impl Default for Operation {
    fn default() -> Self {
        Self::Other
    }
}

/// Group, version, and kind of the object under admission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    /// API version.
    #[serde(default)]
    pub version: String,
    /// Kind.
    #[serde(default)]
    pub kind: String,
}

/// The requesting principal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    /// Authenticated username.
    #[serde(default)]
    pub username: String,
    /// Principal UID, when the authenticator provides one.
    #[serde(default)]
    pub uid: String,
    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// One admission request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Request UID, echoed into notifications.
    #[serde(default)]
    pub uid: String,
    /// Operation under decision.
    #[serde(default)]
    pub operation: Operation,
    /// Group/version/kind of the object.
    #[serde(default)]
    pub kind: GroupVersionKind,
    /// Plural resource name, e.g. `replicasets`.
    #[serde(default)]
    pub resource: String,
    /// Sub-resource, e.g. `status`; empty for the main resource.
    #[serde(default)]
    pub sub_resource: String,
    /// Namespace of the object.
    #[serde(default)]
    pub namespace: String,
    /// Name of the object.
    #[serde(default)]
    pub name: String,
    /// New object document (CREATE and UPDATE).
    #[serde(default)]
    pub object: Option<Value>,
    /// Previous object document (UPDATE and DELETE).
    #[serde(default)]
    pub old_object: Option<Value>,
    /// Requesting principal.
    #[serde(default)]
    pub user: UserInfo,
    /// Field manager from the request options, when present.
    #[serde(default)]
    pub field_manager: String,
}

/// Result status attached to denials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// HTTP-style status code.
    pub code: u16,
    /// Human-readable reason.
    pub message: String,
}

/// One JSON-Patch operation (RFC 6902).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOperation {
    /// Operation name; the core only emits `add`, which also replaces
    /// existing members.
    pub op: String,
    /// JSON pointer to the target.
    pub path: String,
    /// Value to set.
    pub value: Value,
}

/// The decision returned to the webhook scaffolding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Whether the mutation is admitted.
    pub allowed: bool,
    /// Denial status, when not allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// JSON-Patch to apply to the object, when allowed and state-mutating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Vec<PatchOperation>>,
    /// Warnings surfaced to the caller; present only on allowed responses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Audit annotations for the platform's audit log.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub audit_annotations: std::collections::BTreeMap<String, String>,
}

impl AdmissionResponse {
    /// An allowed response with no further detail.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            ..Self::default()
        }
    }

    /// A denial carrying a human-readable reason.
    #[must_use]
    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            status: Some(Status {
                code: 403,
                message: message.into(),
            }),
            ..Self::default()
        }
    }
}

/// Escapes a JSON-pointer segment (RFC 6901).
#[must_use]
pub fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Builds the JSON-Patch that writes `entries` as annotations on `object`.
///
/// When the object has no annotations map yet, a single `add` creates it
/// with all entries; otherwise each entry becomes a member-level `add`,
/// which per RFC 6902 also replaces an existing member.
#[must_use]
pub fn annotation_patch(object: &Object, entries: &[(String, String)]) -> Vec<PatchOperation> {
    if entries.is_empty() {
        return Vec::new();
    }

    let has_annotations = object
        .as_value()
        .pointer("/metadata/annotations")
        .is_some_and(Value::is_object);

    if has_annotations {
        entries
            .iter()
            .map(|(key, value)| PatchOperation {
                op: "add".to_owned(),
                path: format!(
                    "/metadata/annotations/{}",
                    escape_pointer_segment(key)
                ),
                value: Value::String(value.clone()),
            })
            .collect()
    } else {
        let map: serde_json::Map<String, Value> = entries
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        vec![PatchOperation {
            op: "add".to_owned(),
            path: "/metadata/annotations".to_owned(),
            value: Value::Object(map),
        }]
    }
}
