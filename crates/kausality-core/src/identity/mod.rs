//! Principal identity hashing and hash-list set algebra.
//!
//! Every principal that touches a tracked object is recorded on the object as
//! a short digest rather than a raw username, so annotations never leak who
//! operates a cluster. The digest is a truncated SHA-256: deterministic,
//! stable across processes, and collision-resistant for the principal
//! cardinalities a control plane sees in practice.
//!
//! Hash lists are stored as comma-separated strings in annotations. They are
//! sets semantically: no duplicates, and the stored order (first appearance)
//! carries no meaning.

use sha2::{Digest, Sha256};

/// Length of a principal hash in hex characters.
pub const PRINCIPAL_HASH_LEN: usize = 5;

/// Hashes a principal name to a fixed-width hex digest.
///
/// The digest is the first [`PRINCIPAL_HASH_LEN`] hex characters of the
/// SHA-256 of the UTF-8 bytes of `name`. Case-sensitive.
#[must_use]
pub fn hash_principal(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let mut out = hex::encode(digest);
    out.truncate(PRINCIPAL_HASH_LEN);
    out
}

/// An ordered, duplicate-free list of principal hashes.
///
/// The canonical order is first appearance. Serialized form is a
/// comma-separated string, the wire format of the `updaters` and
/// `controllers` annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashList(Vec<String>);

impl HashList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Parses a comma-separated hash list, dropping empty segments and
    /// duplicates while preserving first-appearance order.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut list = Self::new();
        for segment in raw.split(',') {
            let segment = segment.trim();
            if !segment.is_empty() {
                list.insert(segment);
            }
        }
        list
    }

    /// Emits the comma-separated wire form.
    #[must_use]
    pub fn emit(&self) -> String {
        self.0.join(",")
    }

    /// Returns true when `hash` is a member.
    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.0.iter().any(|h| h == hash)
    }

    /// Inserts `hash` if not already present. Returns true when the list
    /// changed.
    pub fn insert(&mut self, hash: &str) -> bool {
        if self.contains(hash) {
            return false;
        }
        self.0.push(hash.to_owned());
        true
    }

    /// Set intersection, preserving the order of `self`.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|h| other.contains(h))
                .cloned()
                .collect(),
        )
    }

    /// Set union: the members of `self` followed by members of `other` not
    /// already present.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for hash in &other.0 {
            out.insert(hash);
        }
        out
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the list has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The members in canonical order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// The first member, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}
