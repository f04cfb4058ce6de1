//! Dynamic, schema-less object documents.
//!
//! The admission path reads arbitrary JSON shapes: any kind a control plane
//! serves can flow through the webhook. [`Object`] wraps the raw document and
//! exposes the typed accessors the decision pipeline needs (generation, owner
//! references, annotations, conditions, spec) instead of ad-hoc traversal at
//! every call site.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors produced while parsing an object document.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// The raw bytes were not valid JSON.
    #[error("invalid object document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The document was valid JSON but not a JSON object.
    #[error("object document is not a JSON object")]
    NotAnObject,

    /// The request carried no object bytes.
    #[error("no object data in request")]
    Empty,
}

/// Reference to an object, the shape used in owner lookups, drift
/// identifiers, and notification payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// API version, e.g. `apps/v1`.
    #[serde(default)]
    pub api_version: String,
    /// Object kind, e.g. `Deployment`.
    #[serde(default)]
    pub kind: String,
    /// Namespace; empty for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Object name.
    #[serde(default)]
    pub name: String,
    /// Store-assigned unique identifier, when known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Generation at the time the reference was taken.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub generation: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// An owner reference carried by a child object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerReference {
    /// API version of the owner.
    pub api_version: String,
    /// Kind of the owner.
    pub kind: String,
    /// Name of the owner.
    pub name: String,
    /// UID of the owner.
    pub uid: String,
    /// Whether this owner is the managing controller. At most one owner
    /// reference on an object may carry this flag.
    pub controller: bool,
}

/// A status condition on an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    /// Condition type, e.g. `Ready`.
    pub kind: String,
    /// Condition status, conventionally `True`, `False`, or `Unknown`.
    pub status: String,
    /// Per-condition observed generation, for controller families that
    /// record it there instead of at the top of status.
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Returns true when the condition status is `True`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// A dynamic object document.
///
/// Cheap accessors over the underlying JSON; mutation is limited to the
/// metadata the core owns (annotations, namespace defaulting).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    value: Value,
}

impl Object {
    /// Parses an object from raw JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::Empty`] for empty input, [`ObjectError::Malformed`]
    /// for invalid JSON, and [`ObjectError::NotAnObject`] when the document is
    /// not a JSON object.
    pub fn from_raw(raw: &[u8]) -> Result<Self, ObjectError> {
        if raw.is_empty() {
            return Err(ObjectError::Empty);
        }
        let value: Value = serde_json::from_slice(raw)?;
        Self::from_value(value)
    }

    /// Wraps an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectError::NotAnObject`] when `value` is not a JSON object.
    pub fn from_value(value: Value) -> Result<Self, ObjectError> {
        if !value.is_object() {
            return Err(ObjectError::NotAnObject);
        }
        Ok(Self { value })
    }

    /// The underlying JSON document.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    fn str_field(&self, path: &[&str]) -> &str {
        let mut cursor = &self.value;
        for key in path {
            match cursor.get(key) {
                Some(next) => cursor = next,
                None => return "",
            }
        }
        cursor.as_str().unwrap_or("")
    }

    /// API version (`apiVersion`), empty when absent.
    #[must_use]
    pub fn api_version(&self) -> &str {
        self.str_field(&["apiVersion"])
    }

    /// Kind, empty when absent.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.str_field(&["kind"])
    }

    /// Name from metadata.
    #[must_use]
    pub fn name(&self) -> &str {
        self.str_field(&["metadata", "name"])
    }

    /// Namespace from metadata; empty for cluster-scoped objects.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.str_field(&["metadata", "namespace"])
    }

    /// Store-assigned UID from metadata.
    #[must_use]
    pub fn uid(&self) -> &str {
        self.str_field(&["metadata", "uid"])
    }

    /// Spec generation; 0 when the store has not assigned one.
    #[must_use]
    pub fn generation(&self) -> i64 {
        self.value
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Deletion timestamp from metadata, when the object is terminating.
    #[must_use]
    pub fn deletion_timestamp(&self) -> Option<&str> {
        self.value
            .pointer("/metadata/deletionTimestamp")
            .and_then(Value::as_str)
    }

    /// A single annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.value
            .pointer("/metadata/annotations")
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    /// All annotations as an owned map. Non-string values are skipped.
    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map("/metadata/annotations")
    }

    /// All labels as an owned map. Non-string values are skipped.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map("/metadata/labels")
    }

    fn string_map(&self, pointer: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Some(Value::Object(map)) = self.value.pointer(pointer) {
            for (k, v) in map {
                if let Some(s) = v.as_str() {
                    out.insert(k.clone(), s.to_owned());
                }
            }
        }
        out
    }

    /// Sets an annotation, creating the metadata/annotations maps as needed.
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        let root = self
            .value
            .as_object_mut()
            .expect("Object wraps a JSON object");
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(serde_json::Map::new());
        }
        let annotations = metadata
            .as_object_mut()
            .expect("metadata coerced to object")
            .entry("annotations")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !annotations.is_object() {
            *annotations = Value::Object(serde_json::Map::new());
        }
        annotations
            .as_object_mut()
            .expect("annotations coerced to object")
            .insert(key.to_owned(), Value::String(value.to_owned()));
    }

    /// Defaults the namespace from the request when the document omits it.
    pub fn set_namespace_if_empty(&mut self, namespace: &str) {
        if namespace.is_empty() || !self.namespace().is_empty() {
            return;
        }
        let root = self
            .value
            .as_object_mut()
            .expect("Object wraps a JSON object");
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(map) = metadata.as_object_mut() {
            map.insert(
                "namespace".to_owned(),
                Value::String(namespace.to_owned()),
            );
        }
    }

    /// All owner references on the object.
    #[must_use]
    pub fn owner_references(&self) -> Vec<OwnerReference> {
        let Some(Value::Array(refs)) = self.value.pointer("/metadata/ownerReferences") else {
            return Vec::new();
        };
        refs.iter()
            .filter_map(|r| {
                let obj = r.as_object()?;
                Some(OwnerReference {
                    api_version: str_of(obj.get("apiVersion")),
                    kind: str_of(obj.get("kind")),
                    name: str_of(obj.get("name")),
                    uid: str_of(obj.get("uid")),
                    controller: obj
                        .get("controller")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                })
            })
            .collect()
    }

    /// The unique owner reference carrying the controller flag, if any.
    #[must_use]
    pub fn controller_owner(&self) -> Option<OwnerReference> {
        self.owner_references().into_iter().find(|r| r.controller)
    }

    /// Top-level `status.observedGeneration`, when present.
    #[must_use]
    pub fn status_observed_generation(&self) -> Option<i64> {
        self.value
            .pointer("/status/observedGeneration")
            .and_then(Value::as_i64)
    }

    /// Status conditions, in document order.
    #[must_use]
    pub fn conditions(&self) -> Vec<Condition> {
        let Some(Value::Array(conds)) = self.value.pointer("/status/conditions") else {
            return Vec::new();
        };
        conds
            .iter()
            .filter_map(|c| {
                let obj = c.as_object()?;
                Some(Condition {
                    kind: str_of(obj.get("type")),
                    status: str_of(obj.get("status")),
                    observed_generation: obj
                        .get("observedGeneration")
                        .and_then(Value::as_i64),
                })
            })
            .collect()
    }

    /// The `spec` field, when present.
    #[must_use]
    pub fn spec(&self) -> Option<&Value> {
        self.value.get("spec")
    }

    /// A reference to this object, capturing its current generation.
    #[must_use]
    pub fn to_ref(&self) -> ObjectRef {
        ObjectRef {
            api_version: self.api_version().to_owned(),
            kind: self.kind().to_owned(),
            namespace: self.namespace().to_owned(),
            name: self.name().to_owned(),
            uid: self.uid().to_owned(),
            generation: self.generation(),
        }
    }
}

fn str_of(v: Option<&Value>) -> String {
    v.and_then(Value::as_str).unwrap_or("").to_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Object {
        Object::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "metadata": {
                "name": "web-abc",
                "namespace": "prod",
                "uid": "uid-1",
                "generation": 4,
                "annotations": {"kausality.io/updaters": "ab123"},
                "labels": {"app": "web"},
                "ownerReferences": [
                    {"apiVersion": "apps/v1", "kind": "Deployment", "name": "web",
                     "uid": "uid-0", "controller": true},
                    {"apiVersion": "v1", "kind": "ConfigMap", "name": "cfg"}
                ]
            },
            "spec": {"replicas": 3},
            "status": {
                "observedGeneration": 3,
                "conditions": [
                    {"type": "Ready", "status": "True", "observedGeneration": 3},
                    {"type": "Progressing", "status": "False"}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn typed_accessors() {
        let obj = sample();
        assert_eq!(obj.api_version(), "apps/v1");
        assert_eq!(obj.kind(), "ReplicaSet");
        assert_eq!(obj.name(), "web-abc");
        assert_eq!(obj.namespace(), "prod");
        assert_eq!(obj.generation(), 4);
        assert_eq!(obj.status_observed_generation(), Some(3));
        assert_eq!(obj.annotation("kausality.io/updaters"), Some("ab123"));
        assert_eq!(obj.labels().get("app").map(String::as_str), Some("web"));
        assert_eq!(obj.spec(), Some(&json!({"replicas": 3})));
    }

    #[test]
    fn controller_owner_requires_flag() {
        let obj = sample();
        let owner = obj.controller_owner().expect("controller owner");
        assert_eq!(owner.kind, "Deployment");
        assert_eq!(owner.name, "web");

        let no_flag = Object::from_value(json!({
            "metadata": {"ownerReferences": [
                {"apiVersion": "apps/v1", "kind": "Deployment", "name": "x", "controller": false}
            ]}
        }))
        .unwrap();
        assert!(no_flag.controller_owner().is_none());
    }

    #[test]
    fn conditions_carry_observed_generation() {
        let conds = sample().conditions();
        assert_eq!(conds.len(), 2);
        assert_eq!(conds[0].kind, "Ready");
        assert!(conds[0].is_true());
        assert_eq!(conds[0].observed_generation, Some(3));
        assert_eq!(conds[1].observed_generation, None);
    }

    #[test]
    fn missing_fields_default() {
        let obj = Object::from_value(json!({"kind": "ConfigMap"})).unwrap();
        assert_eq!(obj.name(), "");
        assert_eq!(obj.generation(), 0);
        assert!(obj.owner_references().is_empty());
        assert!(obj.conditions().is_empty());
        assert!(obj.spec().is_none());
        assert!(obj.deletion_timestamp().is_none());
    }

    #[test]
    fn set_annotation_creates_maps() {
        let mut obj = Object::from_value(json!({"kind": "ConfigMap"})).unwrap();
        obj.set_annotation("kausality.io/trace", "[]");
        assert_eq!(obj.annotation("kausality.io/trace"), Some("[]"));
    }

    #[test]
    fn namespace_defaulting_does_not_overwrite() {
        let mut obj = sample();
        obj.set_namespace_if_empty("other");
        assert_eq!(obj.namespace(), "prod");

        let mut bare = Object::from_value(json!({"kind": "ConfigMap"})).unwrap();
        bare.set_namespace_if_empty("default");
        assert_eq!(bare.namespace(), "default");
    }

    #[test]
    fn from_raw_rejects_bad_input() {
        assert!(matches!(Object::from_raw(b""), Err(ObjectError::Empty)));
        assert!(matches!(
            Object::from_raw(b"not json"),
            Err(ObjectError::Malformed(_))
        ));
        assert!(matches!(
            Object::from_raw(b"[1,2]"),
            Err(ObjectError::NotAnObject)
        ));
    }
}
