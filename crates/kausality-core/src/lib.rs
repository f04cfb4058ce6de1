//! # kausality-core
//!
//! Drift detection and causal tracing for declarative control planes.
//!
//! This crate is the admission decision engine of Kausality: it intercepts
//! every mutation of tracked resources and decides whether the change is
//! expected reconciliation by the owning controller, a new user-initiated
//! origin, or drift: the controller mutating a child while its parent is
//! stable. Drift is logged or blocked according to policy, and every allowed
//! mutation is stamped with a causal trace linking it back to the intent
//! that started the chain.
//!
//! ## Architecture
//!
//! - **Identity hashing** (`identity`): principals are recorded on objects
//!   as short digests, never raw names.
//! - **Parent resolution and drift detection** (`drift`): controller
//!   identity is inferred from the intersection of hash lists on child and
//!   parent; drift is a stable parent being written by its own controller.
//! - **Approvals, rejections, freeze** (`approval`): explicit allow/deny
//!   entries on the parent.
//! - **Mode resolution** (`policy`): `log` or `enforce`, resolved through a
//!   precedence chain ending at a pluggable [`policy::Resolver`].
//! - **Trace propagation** (`trace`): multi-hop causal chains persisted as
//!   one annotation.
//! - **Admission orchestration** (`admission`): the synchronous pipeline
//!   producing the decision, patch, warnings, and audit annotations.
//! - **Background workers** (`recorder`, `notify`): controller-hash
//!   recording and drift notification dispatch, fire-and-forget relative to
//!   the admission response.
//!
//! All persistent state lives on the objects themselves as annotations
//! under the `kausality.io/` namespace; the core owns no database. Storage
//! is behind the [`store::ObjectStore`] trait so embeddings swap a live
//! cluster client for the in-memory implementation in tests.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use kausality_core::admission::Handler;
//! use kausality_core::policy::StaticResolver;
//! use kausality_core::store::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let handler = Handler::new(store, Arc::new(StaticResolver::default()));
//! // handler.handle(&request).await? inside the webhook endpoint
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod annotations;
pub mod approval;
pub mod drift;
pub mod identity;
pub mod notify;
pub mod object;
pub mod policy;
pub mod recorder;
pub mod store;
pub mod trace;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::admission::{AdmissionRequest, AdmissionResponse, Handler, Operation};
    pub use crate::notify::{Dispatcher, DispatcherConfig, Sender, SenderConfig};
    pub use crate::policy::{Mode, Resolver, StaticResolver};
    pub use crate::recorder::{Recorder, RecorderConfig};
    pub use crate::store::{MemoryStore, ObjectStore};
}

pub use admission::Handler;
pub use object::Object;
pub use policy::{Mode, Resolver};
pub use store::ObjectStore;
