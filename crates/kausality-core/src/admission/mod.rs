//! Admission handling.
//!
//! The [`Handler`] is the synchronous decision pipeline invoked once per
//! mutation: parse, resolve the parent, classify lifecycle, detect drift,
//! apply freeze and approvals, resolve the effective mode, compute the
//! causal trace, and assemble the response with its patch, warnings, and
//! audit annotations. Side effects that cannot run inside the admission
//! (controller-hash recording, drift notifications) are handed to the
//! background workers.

mod audit;
mod error;
mod handler;
mod payload;

pub use audit::{
    AUDIT_DECISION, AUDIT_DRIFT, AUDIT_DRIFT_RESOLUTION, AUDIT_LIFECYCLE_PHASE, AUDIT_MODE,
    AUDIT_TRACE, AuditTrail,
};
pub use error::AdmissionError;
pub use handler::Handler;
pub use payload::{
    AdmissionRequest, AdmissionResponse, GroupVersionKind, Operation, PatchOperation, Status,
    UserInfo,
};
