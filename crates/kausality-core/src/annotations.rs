//! Annotation keys in the `kausality.io/` namespace.
//!
//! The core owns no database: all persistent state lives on the objects
//! themselves under these keys. The core exclusively owns the keys it writes
//! (trace, updaters, controllers, observed generation fallback, phase);
//! approvals, rejections, freeze, snooze, and mode are written by users or
//! policy tooling and only read here.

/// Causal trace, a JSON array of hops. Written by the core.
pub const TRACE: &str = "kausality.io/trace";

/// Comma-separated hashes of principals that have modified the object's
/// spec. Written by the core on UPDATE.
pub const UPDATERS: &str = "kausality.io/updaters";

/// Comma-separated hashes of principals that have written the object's
/// status subresource. Written asynchronously by the core.
pub const CONTROLLERS: &str = "kausality.io/controllers";

/// Synthetic observed-generation fallback, a numeric string. Written
/// asynchronously by the core on status-subresource updates for controllers
/// that never publish `status.observedGeneration`.
pub const OBSERVED_GENERATION: &str = "kausality.io/observedGeneration";

/// Lifecycle phase marker. The only value the core writes is
/// [`PHASE_INITIALIZED`]; once set it is never cleared.
pub const PHASE: &str = "kausality.io/phase";

/// Value of [`PHASE`] marking a parent as initialized.
pub const PHASE_INITIALIZED: &str = "initialized";

/// Per-object or per-namespace mode override (`log` or `enforce`). User
/// owned.
pub const MODE: &str = "kausality.io/mode";

/// JSON array of approval entries on a parent. User owned.
pub const APPROVALS: &str = "kausality.io/approvals";

/// JSON array of rejection entries on a parent. User owned.
pub const REJECTIONS: &str = "kausality.io/rejections";

/// JSON `{user, message}` freeze marker on a parent. User owned.
pub const FREEZE: &str = "kausality.io/freeze";

/// RFC-3339 instant until which drift notifications are suppressed. User
/// owned, read by the dispatcher.
pub const SNOOZE: &str = "kausality.io/snooze";

/// Prefix of free-form labels copied into trace hops.
pub const TRACE_LABEL_PREFIX: &str = "kausality.io/trace-";
