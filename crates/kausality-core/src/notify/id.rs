//! Stable drift identifiers.
//!
//! Detection identifiers bind a parent/child pair to a concrete spec diff,
//! so distinct divergences of the same child deduplicate independently.
//! Resolution identifiers omit the diff: a resolution is addressable no
//! matter which diff triggered detection.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::object::ObjectRef;

/// Length of a drift identifier in hex characters.
pub const DRIFT_ID_LEN: usize = 16;

/// Identifier of one drift occurrence: digest over parent reference, child
/// reference, and the spec diff bytes.
#[must_use]
pub fn drift_id(parent: &ObjectRef, child: &ObjectRef, spec_diff: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hash_ref(&mut hasher, parent);
    hash_ref(&mut hasher, child);
    hasher.update(spec_diff);
    truncate_hex(hasher)
}

/// Identifier of a drift resolution for a parent/child pair.
#[must_use]
pub fn resolution_id(parent: &ObjectRef, child: &ObjectRef) -> String {
    let mut hasher = Sha256::new();
    hash_ref(&mut hasher, parent);
    hash_ref(&mut hasher, child);
    truncate_hex(hasher)
}

/// Canonical bytes describing a spec transition, suitable for hashing.
///
/// Keys are emitted in sorted order, so equal diffs always produce equal
/// bytes.
#[must_use]
pub fn spec_diff_bytes(old_spec: Option<&Value>, new_spec: Option<&Value>) -> Vec<u8> {
    let doc = serde_json::json!({
        "old": old_spec.cloned().unwrap_or(Value::Null),
        "new": new_spec.cloned().unwrap_or(Value::Null),
    });
    serde_json::to_vec(&doc).unwrap_or_default()
}

fn hash_ref(hasher: &mut Sha256, reference: &ObjectRef) {
    for field in [
        &reference.api_version,
        &reference.kind,
        &reference.namespace,
        &reference.name,
    ] {
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
    }
}

fn truncate_hex(hasher: Sha256) -> String {
    let mut out = hex::encode(hasher.finalize());
    out.truncate(DRIFT_ID_LEN);
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn reference(kind: &str, name: &str) -> ObjectRef {
        ObjectRef {
            api_version: "apps/v1".into(),
            kind: kind.into(),
            namespace: "prod".into(),
            name: name.into(),
            ..ObjectRef::default()
        }
    }

    #[test]
    fn drift_id_is_stable_and_fixed_width() {
        let parent = reference("Deployment", "web");
        let child = reference("ReplicaSet", "web-abc");
        let diff = spec_diff_bytes(Some(&json!({"replicas": 1})), Some(&json!({"replicas": 3})));

        let a = drift_id(&parent, &child, &diff);
        let b = drift_id(&parent, &child, &diff);
        assert_eq!(a, b);
        assert_eq!(a.len(), DRIFT_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_child_kinds_produce_different_ids() {
        let parent = reference("Deployment", "web");
        let diff = spec_diff_bytes(None, Some(&json!({"replicas": 3})));
        let a = drift_id(&parent, &reference("ReplicaSet", "x"), &diff);
        let b = drift_id(&parent, &reference("StatefulSet", "x"), &diff);
        assert_ne!(a, b);
    }

    #[test]
    fn different_diffs_produce_different_ids() {
        let parent = reference("Deployment", "web");
        let child = reference("ReplicaSet", "web-abc");
        let diff_a = spec_diff_bytes(None, Some(&json!({"replicas": 3})));
        let diff_b = spec_diff_bytes(None, Some(&json!({"replicas": 4})));
        assert_ne!(
            drift_id(&parent, &child, &diff_a),
            drift_id(&parent, &child, &diff_b)
        );
    }

    #[test]
    fn resolution_id_ignores_diff() {
        let parent = reference("Deployment", "web");
        let child = reference("ReplicaSet", "web-abc");
        let id = resolution_id(&parent, &child);
        assert_eq!(id.len(), DRIFT_ID_LEN);
        assert_ne!(
            id,
            drift_id(&parent, &child, &spec_diff_bytes(None, None)),
            "resolution and detection identifiers are distinct spaces"
        );
    }

    #[test]
    fn field_boundaries_are_separated() {
        // "ab" + "c" must not collide with "a" + "bc".
        let a = resolution_id(&reference("ab", "c"), &reference("x", "y"));
        let b = resolution_id(&reference("a", "bc"), &reference("x", "y"));
        assert_ne!(a, b);
    }

    #[test]
    fn spec_diff_bytes_are_deterministic() {
        let old = json!({"b": 1, "a": 2});
        let new = json!({"a": 2, "b": 1});
        // serde_json sorts object keys, so semantically equal specs hash
        // equally regardless of input order.
        assert_eq!(
            spec_diff_bytes(Some(&old), Some(&old)),
            spec_diff_bytes(Some(&old), Some(&new)),
        );
    }
}
