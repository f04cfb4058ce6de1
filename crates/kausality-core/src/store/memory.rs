//! In-memory [`ObjectStore`] for tests and embeddings.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{AnnotationPatch, BoxFuture, ObjectStore, StoreError};
use crate::object::{Object, ObjectRef};

#[derive(Default)]
struct Inner {
    objects: HashMap<(String, String, String), Object>,
    // Number of upcoming patch calls that fail with Conflict, then Unavailable.
    conflicts_remaining: u32,
    fail_unavailable: bool,
    patch_calls: u64,
}

/// A process-local object store backed by a map.
///
/// Besides the trait surface it offers seeding helpers and failure injection
/// so retry paths can be exercised deterministically.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: &str, namespace: &str, name: &str) -> (String, String, String) {
        (kind.to_owned(), namespace.to_owned(), name.to_owned())
    }

    /// Inserts or replaces an object, keyed by kind, namespace, and name.
    pub fn put(&self, object: Object) {
        let key = Self::key(object.kind(), object.namespace(), object.name());
        self.inner.lock().unwrap().objects.insert(key, object);
    }

    /// Removes an object.
    pub fn remove(&self, kind: &str, namespace: &str, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .objects
            .remove(&Self::key(kind, namespace, name));
    }

    /// Makes the next `n` patch calls fail with [`StoreError::Conflict`].
    pub fn inject_conflicts(&self, n: u32) {
        self.inner.lock().unwrap().conflicts_remaining = n;
    }

    /// Makes every patch call fail with [`StoreError::Unavailable`] until
    /// cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().fail_unavailable = unavailable;
    }

    /// Number of patch calls observed, including failed ones.
    #[must_use]
    pub fn patch_calls(&self) -> u64 {
        self.inner.lock().unwrap().patch_calls
    }

    /// Fetches a clone of a stored object, bypassing the trait.
    #[must_use]
    pub fn get_sync(&self, kind: &str, namespace: &str, name: &str) -> Option<Object> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(&Self::key(kind, namespace, name))
            .cloned()
    }
}

impl ObjectStore for MemoryStore {
    fn get<'a>(
        &'a self,
        kind: &'a str,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Object>, StoreError>> {
        Box::pin(async move { Ok(self.get_sync(kind, namespace, name)) })
    }

    fn patch_annotations<'a>(
        &'a self,
        target: &'a ObjectRef,
        patch: &'a [AnnotationPatch],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.patch_calls += 1;
            if inner.fail_unavailable {
                return Err(StoreError::Unavailable("injected".to_owned()));
            }
            if inner.conflicts_remaining > 0 {
                inner.conflicts_remaining -= 1;
                return Err(StoreError::Conflict);
            }
            let key = Self::key(&target.kind, &target.namespace, &target.name);
            let Some(object) = inner.objects.get_mut(&key) else {
                return Err(StoreError::Unavailable(format!(
                    "no such object {}/{} ({})",
                    target.namespace, target.name, target.kind
                )));
            };
            for op in patch {
                object.set_annotation(&op.key, &op.value);
            }
            Ok(())
        })
    }
}
