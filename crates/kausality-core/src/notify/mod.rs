//! Drift notifications.
//!
//! When a drift is first observed, a `Detected` report is POSTed to a
//! configured receiver; when a later observation of the same parent/child
//! pair shows the drift is gone, a `Resolved` report follows. Delivery is
//! asynchronous relative to the admission response, deduplicated per
//! process by a TTL tracker, and retried a bounded number of times.

mod dispatcher;
mod id;
mod report;
mod sender;
mod tracker;

pub use dispatcher::{Dispatcher, DispatcherConfig, DriftObservation};
pub use id::{DRIFT_ID_LEN, drift_id, resolution_id, spec_diff_bytes};
pub use report::{
    DetectionContext, DriftPhase, DriftReport, DriftReportResponse, DriftReportSpec,
    RequestContext,
};
pub use sender::{NotifyError, Sender, SenderConfig};
pub use tracker::{DEFAULT_TTL, Tracker};
