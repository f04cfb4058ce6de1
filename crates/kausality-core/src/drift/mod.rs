//! Drift detection.
//!
//! A mutation of a tracked child is *drift* when the owning controller writes
//! the child while its parent is stable: the parent's generation equals the
//! generation the controller last reported acting on. The submodules split
//! the decision into parent resolution, lifecycle classification, and the
//! drift heuristics themselves.

mod detector;
mod lifecycle;
mod resolver;

pub use detector::{ControllerIdentity, Detector, DriftAssessment, identify_controller};
pub use lifecycle::{LifecyclePhase, classify_phase};
pub use resolver::{ParentResolver, ParentState};
