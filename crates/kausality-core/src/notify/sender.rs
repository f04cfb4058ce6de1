//! HTTP delivery of drift reports.

use std::time::Duration;

use thiserror::Error;

use super::report::{DriftReport, DriftReportResponse};

/// Errors produced while delivering a report.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The sender configuration is unusable.
    #[error("invalid sender configuration: {0}")]
    Configuration(String),

    /// The receiver answered but refused the report. Not retried.
    #[error("report not acknowledged by receiver{}", fmt_detail(.detail))]
    NotAcknowledged {
        /// Receiver-side error detail, when provided.
        detail: Option<String>,
    },

    /// All delivery attempts failed.
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Description of the final failure.
        last_error: String,
    },
}

fn fmt_detail(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Receiver URL.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries after the first attempt, for transport errors and non-2xx
    /// responses.
    pub max_retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl SenderConfig {
    /// Configuration with default timeout and retry settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Delivers drift reports over HTTP.
#[derive(Debug)]
pub struct Sender {
    client: reqwest::Client,
    config: SenderConfig,
}

impl Sender {
    /// Creates a sender.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Configuration`] for an empty URL or an HTTP
    /// client that cannot be built.
    pub fn new(config: SenderConfig) -> Result<Self, NotifyError> {
        if config.url.trim().is_empty() {
            return Err(NotifyError::Configuration("url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| NotifyError::Configuration(err.to_string()))?;
        Ok(Self { client, config })
    }

    /// Delivers one report, retrying transport errors and non-2xx responses
    /// up to the configured count.
    ///
    /// An explicit `acknowledged: false` from the receiver is terminal: the
    /// receiver saw the report and refused it, so retrying cannot help.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::NotAcknowledged`] on refusal and
    /// [`NotifyError::Exhausted`] when every attempt failed.
    pub async fn send(&self, report: &DriftReport) -> Result<(), NotifyError> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.attempt(report).await {
                Ok(()) => {
                    tracing::debug!(
                        id = %report.spec.id,
                        phase = ?report.spec.phase,
                        attempt,
                        "drift report delivered"
                    );
                    return Ok(());
                }
                Err(AttemptError::Refused { detail }) => {
                    return Err(NotifyError::NotAcknowledged { detail });
                }
                Err(AttemptError::Retriable(description)) => {
                    tracing::warn!(
                        id = %report.spec.id,
                        attempt,
                        error = %description,
                        "drift report delivery attempt failed"
                    );
                    last_error = description;
                }
            }
        }

        Err(NotifyError::Exhausted {
            attempts,
            last_error,
        })
    }

    async fn attempt(&self, report: &DriftReport) -> Result<(), AttemptError> {
        let response = self
            .client
            .post(&self.config.url)
            .json(report)
            .send()
            .await
            .map_err(|err| AttemptError::Retriable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Retriable(format!(
                "receiver returned status {status}"
            )));
        }

        let ack: DriftReportResponse = response
            .json()
            .await
            .map_err(|err| AttemptError::Retriable(format!("invalid acknowledgement: {err}")))?;

        if ack.acknowledged {
            Ok(())
        } else {
            Err(AttemptError::Refused { detail: ack.error })
        }
    }
}

enum AttemptError {
    Retriable(String),
    Refused { detail: Option<String> },
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::notify::report::{DetectionContext, DriftPhase, DriftReportSpec, RequestContext};
    use crate::object::ObjectRef;

    fn sample_report() -> DriftReport {
        DriftReport::new(DriftReportSpec {
            id: "abcd1234abcd1234".to_owned(),
            phase: DriftPhase::Detected,
            parent: ObjectRef::default(),
            child: ObjectRef::default(),
            old_object: None,
            new_object: Some(json!({"spec": {"replicas": 3}})),
            request: RequestContext::default(),
            detection: DetectionContext::default(),
        })
    }

    #[derive(Clone)]
    struct ReceiverState {
        calls: Arc<AtomicU32>,
        // Fail this many initial requests with HTTP 503.
        failures: Arc<AtomicU32>,
        acknowledged: bool,
    }

    async fn serve(state: ReceiverState) -> SocketAddr {
        let app = Router::new()
            .route(
                "/report",
                post(
                    |State(state): State<ReceiverState>, Json(_body): Json<serde_json::Value>| async move {
                        state.calls.fetch_add(1, Ordering::SeqCst);
                        if state
                            .failures
                            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                                v.checked_sub(1)
                            })
                            .is_ok()
                        {
                            return Err(axum::http::StatusCode::SERVICE_UNAVAILABLE);
                        }
                        Ok(Json(json!({"acknowledged": state.acknowledged, "error": null})))
                    },
                ),
            )
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn fast_config(url: String) -> SenderConfig {
        SenderConfig {
            url,
            timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn delivers_and_parses_acknowledgement() {
        let calls = Arc::new(AtomicU32::new(0));
        let addr = serve(ReceiverState {
            calls: Arc::clone(&calls),
            failures: Arc::new(AtomicU32::new(0)),
            acknowledged: true,
        })
        .await;
        let sender = Sender::new(fast_config(format!("http://{addr}/report"))).unwrap();

        sender.send(&sample_report()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_non_2xx_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let addr = serve(ReceiverState {
            calls: Arc::clone(&calls),
            failures: Arc::new(AtomicU32::new(2)),
            acknowledged: true,
        })
        .await;
        let sender = Sender::new(fast_config(format!("http://{addr}/report"))).unwrap();

        sender.send(&sample_report()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_on_persistent_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let addr = serve(ReceiverState {
            calls: Arc::clone(&calls),
            failures: Arc::new(AtomicU32::new(u32::MAX)),
            acknowledged: true,
        })
        .await;
        let sender = Sender::new(fast_config(format!("http://{addr}/report"))).unwrap();

        let err = sender.send(&sample_report()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn refusal_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let addr = serve(ReceiverState {
            calls: Arc::clone(&calls),
            failures: Arc::new(AtomicU32::new(0)),
            acknowledged: false,
        })
        .await;
        let sender = Sender::new(fast_config(format!("http://{addr}/report"))).unwrap();

        let err = sender.send(&sample_report()).await.unwrap_err();
        assert!(matches!(err, NotifyError::NotAcknowledged { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_url_is_rejected() {
        let err = Sender::new(SenderConfig::new("  ")).unwrap_err();
        assert!(matches!(err, NotifyError::Configuration(_)));
    }
}
