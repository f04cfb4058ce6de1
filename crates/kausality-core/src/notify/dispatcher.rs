//! Asynchronous drift report dispatch.
//!
//! The admission handler hands every drift-relevant observation to the
//! dispatcher and returns immediately; delivery happens on a worker task.
//! Per identifier, the state machine is: first drift observation emits
//! `Detected` and tracks the identifier; repeated observations are
//! suppressed while the TTL runs; the first "no drift" observation for the
//! same parent/child pair emits `Resolved` and clears the entry. A sweeper
//! task drops expired entries so the tracker stays bounded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::id::{drift_id, resolution_id, spec_diff_bytes};
use super::report::{DetectionContext, DriftPhase, DriftReport, DriftReportSpec, RequestContext};
use super::sender::Sender;
use super::tracker::{DEFAULT_TTL, Tracker};
use crate::object::ObjectRef;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// TTL for tracked identifiers.
    pub ttl: Duration,
    /// Interval between tracker sweeps.
    pub sweep_interval: Duration,
    /// Capacity of the outbound report queue; over-capacity reports are
    /// dropped with a log line.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_interval: Duration::from_secs(60),
            queue_capacity: 256,
        }
    }
}

/// One observation handed over by the admission handler.
#[derive(Debug, Clone)]
pub struct DriftObservation {
    /// Whether the observation was classified as drift.
    pub drift: bool,
    /// The parent reference.
    pub parent: ObjectRef,
    /// The child reference.
    pub child: ObjectRef,
    /// Previous object state (UPDATE only).
    pub old_object: Option<Value>,
    /// New object state.
    pub new_object: Option<Value>,
    /// Admission request context.
    pub request: RequestContext,
    /// Detection context.
    pub detection: DetectionContext,
    /// Raw `kausality.io/snooze` annotation from the parent, if set.
    pub snooze: Option<String>,
}

/// Deduplicating, asynchronous drift report dispatcher.
pub struct Dispatcher {
    tracker: Arc<Tracker>,
    tx: mpsc::Sender<DriftReport>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl Dispatcher {
    /// Creates a dispatcher and spawns its worker and sweeper tasks. Must be
    /// called within a tokio runtime.
    #[must_use]
    pub fn new(sender: Sender, config: DispatcherConfig) -> Self {
        let tracker = Arc::new(Tracker::with_ttl(config.ttl));
        let (tx, mut rx) = mpsc::channel::<DriftReport>(config.queue_capacity);
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(async move {
            loop {
                let report = tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    report = rx.recv() => match report {
                        Some(report) => report,
                        None => break,
                    },
                };
                let id = report.spec.id.clone();
                let phase = report.spec.phase;
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!(id = %id, "dispatch aborted by shutdown");
                        break;
                    }
                    result = sender.send(&report) => {
                        if let Err(err) = result {
                            tracing::error!(id = %id, phase = ?phase, error = %err,
                                "drift report delivery failed");
                        }
                    }
                }
            }
        });

        let sweep_tracker = Arc::clone(&tracker);
        let mut sweep_shutdown = shutdown.subscribe();
        let sweep_interval = config.sweep_interval;
        let sweeper = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sweep_shutdown.changed() => break,
                    () = tokio::time::sleep(sweep_interval) => {
                        let removed = sweep_tracker.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "swept expired drift identifiers");
                        }
                    }
                }
            }
        });

        Self {
            tracker,
            tx,
            shutdown,
            worker,
            sweeper,
        }
    }

    /// Feeds one observation through the per-identifier state machine.
    ///
    /// Cheap and non-blocking: report delivery happens on the worker task.
    pub fn observe(&self, observation: DriftObservation) {
        let res_id = resolution_id(&observation.parent, &observation.child);

        if observation.drift {
            if snoozed(observation.snooze.as_deref()) {
                tracing::debug!(
                    parent = %observation.parent.name,
                    child = %observation.child.name,
                    "drift notification snoozed"
                );
                return;
            }
            let diff = spec_diff_bytes(
                observation.old_object.as_ref().and_then(|o| o.get("spec")),
                observation.new_object.as_ref().and_then(|o| o.get("spec")),
            );
            let id = drift_id(&observation.parent, &observation.child, &diff);
            if !self.tracker.track(&id) {
                tracing::debug!(id = %id, "duplicate drift detection suppressed");
                return;
            }
            // Outstanding-drift marker, addressed without the diff so any
            // later resolution can find it.
            self.tracker.touch(&res_id);
            self.enqueue(build_report(id, DriftPhase::Detected, observation));
            return;
        }

        // Resolution is never suppressed; it fires once and clears the
        // outstanding marker.
        if self.tracker.remove(&res_id) {
            self.enqueue(build_report(res_id, DriftPhase::Resolved, observation));
        }
    }

    /// The deduplication tracker, exposed for embedders that surface
    /// metrics.
    #[must_use]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Stops the worker and sweeper. Reports still queued are dropped; the
    /// receiver reconciles by identifier.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.worker.await;
        let _ = self.sweeper.await;
    }

    fn enqueue(&self, report: DriftReport) {
        if let Err(err) = self.tx.try_send(report) {
            tracing::warn!(error = %err, "drift report queue full, dropping report");
        }
    }
}

fn build_report(id: String, phase: DriftPhase, observation: DriftObservation) -> DriftReport {
    DriftReport::new(DriftReportSpec {
        id,
        phase,
        parent: observation.parent,
        child: observation.child,
        old_object: observation.old_object,
        new_object: observation.new_object,
        request: observation.request,
        detection: observation.detection,
    })
}

fn snoozed(raw: Option<&str>) -> bool {
    let Some(raw) = raw else {
        return false;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(until) => Utc::now() < until.with_timezone(&Utc),
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed snooze annotation");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::notify::sender::SenderConfig;

    #[derive(Clone, Default)]
    struct Received {
        reports: Arc<Mutex<Vec<Value>>>,
        calls: Arc<AtomicU32>,
    }

    async fn serve(received: Received) -> SocketAddr {
        let app = Router::new()
            .route(
                "/report",
                post(|State(state): State<Received>, Json(body): Json<Value>| async move {
                    state.calls.fetch_add(1, Ordering::SeqCst);
                    state.reports.lock().unwrap().push(body);
                    Json(json!({"acknowledged": true}))
                }),
            )
            .with_state(received);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn dispatcher(addr: SocketAddr) -> Dispatcher {
        let sender = Sender::new(SenderConfig {
            url: format!("http://{addr}/report"),
            timeout: Duration::from_secs(2),
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
        })
        .unwrap();
        Dispatcher::new(sender, DispatcherConfig::default())
    }

    fn observation(drift: bool) -> DriftObservation {
        DriftObservation {
            drift,
            parent: ObjectRef {
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                namespace: "prod".into(),
                name: "web".into(),
                ..ObjectRef::default()
            },
            child: ObjectRef {
                api_version: "apps/v1".into(),
                kind: "ReplicaSet".into(),
                namespace: "prod".into(),
                name: "web-abc".into(),
                ..ObjectRef::default()
            },
            old_object: Some(json!({"spec": {"replicas": 1}})),
            new_object: Some(json!({"spec": {"replicas": 3}})),
            request: RequestContext::default(),
            detection: DetectionContext::default(),
            snooze: None,
        }
    }

    async fn eventually_calls(received: &Received, expected: u32) {
        for _ in 0..100 {
            if received.calls.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {expected} calls, saw {}",
            received.calls.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn first_detection_is_delivered_duplicate_is_suppressed() {
        let received = Received::default();
        let addr = serve(received.clone()).await;
        let dispatcher = dispatcher(addr).await;

        dispatcher.observe(observation(true));
        dispatcher.observe(observation(true));
        eventually_calls(&received, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.calls.load(Ordering::SeqCst), 1);

        let reports = received.reports.lock().unwrap();
        assert_eq!(reports[0]["spec"]["phase"], "Detected");
        assert_eq!(reports[0]["spec"]["id"].as_str().unwrap().len(), 16);
        drop(reports);
        // Detection id plus the outstanding-drift marker.
        assert_eq!(dispatcher.tracker().len(), 2);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn different_diff_is_a_distinct_detection() {
        let received = Received::default();
        let addr = serve(received.clone()).await;
        let dispatcher = dispatcher(addr).await;

        dispatcher.observe(observation(true));
        let mut other = observation(true);
        other.new_object = Some(json!({"spec": {"replicas": 7}}));
        dispatcher.observe(other);
        eventually_calls(&received, 2).await;
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn resolution_fires_once_and_clears() {
        let received = Received::default();
        let addr = serve(received.clone()).await;
        let dispatcher = dispatcher(addr).await;

        dispatcher.observe(observation(true));
        eventually_calls(&received, 1).await;

        dispatcher.observe(observation(false));
        eventually_calls(&received, 2).await;
        // A second "no drift" observation has no outstanding entry.
        dispatcher.observe(observation(false));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.calls.load(Ordering::SeqCst), 2);

        let reports = received.reports.lock().unwrap();
        assert_eq!(reports[1]["spec"]["phase"], "Resolved");
        drop(reports);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn no_drift_without_prior_detection_is_silent() {
        let received = Received::default();
        let addr = serve(received.clone()).await;
        let dispatcher = dispatcher(addr).await;

        dispatcher.observe(observation(false));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.calls.load(Ordering::SeqCst), 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn snooze_suppresses_detection() {
        let received = Received::default();
        let addr = serve(received.clone()).await;
        let dispatcher = dispatcher(addr).await;

        let mut snoozed = observation(true);
        snoozed.snooze = Some((Utc::now() + chrono::Duration::hours(1)).to_rfc3339());
        dispatcher.observe(snoozed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.calls.load(Ordering::SeqCst), 0);

        // Expired snooze no longer suppresses.
        let mut expired = observation(true);
        expired.snooze = Some((Utc::now() - chrono::Duration::hours(1)).to_rfc3339());
        dispatcher.observe(expired);
        eventually_calls(&received, 1).await;
        dispatcher.shutdown().await;
    }

    #[test]
    fn malformed_snooze_is_ignored() {
        assert!(!snoozed(Some("not a timestamp")));
        assert!(!snoozed(None));
    }
}
