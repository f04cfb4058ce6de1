//! Drift report wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object::ObjectRef;

/// API version stamped on outgoing reports.
pub const REPORT_API_VERSION: &str = "kausality.io/v1alpha1";

/// Kind stamped on outgoing reports.
pub const REPORT_KIND: &str = "DriftReport";

/// Whether a report announces detection or resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftPhase {
    /// Drift was observed for the first time.
    Detected,
    /// A previously reported drift is no longer observed.
    Resolved,
}

/// The document POSTed to the notification receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    /// Always [`REPORT_API_VERSION`].
    pub api_version: String,
    /// Always [`REPORT_KIND`].
    pub kind: String,
    /// Report details.
    pub spec: DriftReportSpec,
}

impl DriftReport {
    /// Creates a report with the standard type metadata.
    #[must_use]
    pub fn new(spec: DriftReportSpec) -> Self {
        Self {
            api_version: REPORT_API_VERSION.to_owned(),
            kind: REPORT_KIND.to_owned(),
            spec,
        }
    }
}

/// Details of one drift occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReportSpec {
    /// Stable 16-hex identifier; the receiver's join and dedup key.
    pub id: String,
    /// Detection or resolution.
    pub phase: DriftPhase,
    /// The stable parent whose child drifted.
    pub parent: ObjectRef,
    /// The drifted child.
    pub child: ObjectRef,
    /// Previous object state (UPDATE only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    /// New object state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_object: Option<Value>,
    /// Admission request context.
    pub request: RequestContext,
    /// Drift detection context.
    pub detection: DetectionContext,
}

/// Context of the admission request that surfaced the drift.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Requesting principal.
    pub user: String,
    /// Groups of the requesting principal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Admission request UID.
    pub uid: String,
    /// Field manager from the request options, when present.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field_manager: String,
    /// CREATE, UPDATE, or DELETE.
    pub operation: String,
}

/// Detection details attached to every report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionContext {
    /// Parent generation at detection time.
    pub parent_generation: i64,
    /// Parent observed generation at detection time (0 when undiscovered).
    pub parent_observed_generation: i64,
    /// Whether the requesting principal was identified as the controller.
    pub is_controller: bool,
    /// Lifecycle phase of the parent.
    pub lifecycle_phase: String,
}

/// Acknowledgement returned by the receiver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftReportResponse {
    /// True when the receiver accepted the report.
    #[serde(default)]
    pub acknowledged: bool,
    /// Receiver-side error detail, when not acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_with_type_metadata() {
        let report = DriftReport::new(DriftReportSpec {
            id: "abcd1234abcd1234".to_owned(),
            phase: DriftPhase::Detected,
            parent: ObjectRef {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                namespace: "prod".into(),
                name: "web".into(),
                ..ObjectRef::default()
            },
            child: ObjectRef::default(),
            old_object: None,
            new_object: None,
            request: RequestContext::default(),
            detection: DetectionContext::default(),
        });
        let json: Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["apiVersion"], "kausality.io/v1alpha1");
        assert_eq!(json["kind"], "DriftReport");
        assert_eq!(json["spec"]["phase"], "Detected");
        assert_eq!(json["spec"]["parent"]["apiVersion"], "apps/v1");
        assert!(json["spec"].get("oldObject").is_none());
    }

    #[test]
    fn response_defaults_to_unacknowledged() {
        let response: DriftReportResponse = serde_json::from_str("{}").unwrap();
        assert!(!response.acknowledged);
        assert!(response.error.is_none());
    }
}
