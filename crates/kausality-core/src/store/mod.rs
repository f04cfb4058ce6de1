//! Object store boundary.
//!
//! The core never talks to a live control plane directly. Everything it needs
//! from storage is behind [`ObjectStore`]: fetch a parent by kind, namespace,
//! and name, and patch annotations on an object with optimistic concurrency.
//! Implementations can be a live cluster client in production or
//! [`MemoryStore`] in tests and embeddings.
//!
//! # Async Pattern
//!
//! Trait methods return [`BoxFuture`] so the trait stays object-safe and can
//! be held as `Arc<dyn ObjectStore>` across worker tasks.

mod memory;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub use memory::MemoryStore;

use crate::object::{Object, ObjectRef};

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors surfaced by a store implementation.
///
/// Logical absence of an object is not an error: `get` models it as
/// `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An optimistic-concurrency write lost the race and should be retried
    /// against fresh state.
    #[error("annotation patch conflicted with a concurrent write")]
    Conflict,

    /// The store could not serve the request. Transient by assumption; the
    /// admission path turns this into a fatal admission error.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// One annotation write within a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationPatch {
    /// Annotation key.
    pub key: String,
    /// Annotation value.
    pub value: String,
}

impl AnnotationPatch {
    /// Convenience constructor.
    #[must_use]
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Minimal storage interface consumed by the core.
pub trait ObjectStore: Send + Sync {
    /// Fetches an object by kind, namespace, and name.
    ///
    /// Returns `Ok(None)` when the object does not exist; errors are
    /// reserved for transport or store failures.
    fn get<'a>(
        &'a self,
        kind: &'a str,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Object>, StoreError>>;

    /// Applies annotation writes to the referenced object.
    ///
    /// Implementations use the store's optimistic-concurrency semantics;
    /// a lost race surfaces as [`StoreError::Conflict`].
    fn patch_annotations<'a>(
        &'a self,
        target: &'a ObjectRef,
        patch: &'a [AnnotationPatch],
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}
