//! The admission decision pipeline.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::audit::{
    AUDIT_DECISION, AUDIT_DRIFT, AUDIT_DRIFT_RESOLUTION, AUDIT_LIFECYCLE_PHASE, AUDIT_MODE,
    AUDIT_TRACE, AuditTrail, allowed_decision,
};
use super::error::AdmissionError;
use super::payload::{AdmissionRequest, AdmissionResponse, Operation, annotation_patch};
use crate::annotations;
use crate::approval::{self, Freeze};
use crate::drift::{Detector, DriftAssessment};
use crate::identity::{HashList, hash_principal};
use crate::notify::{DetectionContext, Dispatcher, DriftObservation, RequestContext};
use crate::object::{Object, ObjectError};
use crate::policy::{Mode, Resolver, ResourceContext, effective_mode};
use crate::recorder::Recorder;
use crate::store::ObjectStore;
use crate::trace::propagate;

/// Orchestrates the decision pipeline for one admission at a time.
///
/// Independent requests are processed concurrently; the handler holds no
/// per-request state. Background side effects go through the optional
/// [`Recorder`] and [`Dispatcher`]; without them the handler still decides,
/// it just records no controller hashes and sends no notifications.
pub struct Handler {
    store: Arc<dyn ObjectStore>,
    detector: Detector,
    resolver: Arc<dyn Resolver>,
    recorder: Option<Arc<Recorder>>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl Handler {
    /// Creates a handler over the given store and policy resolver.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            detector: Detector::new(Arc::clone(&store)),
            store,
            resolver,
            recorder: None,
            dispatcher: None,
        }
    }

    /// Attaches the async controller-hash recorder.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Attaches the drift notification dispatcher.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Decides one admission request.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Parse`] for malformed object documents and
    /// [`AdmissionError::Store`] for store failures during decision making.
    /// Everything else resolves to a response; detection failures never
    /// silently allow.
    pub async fn handle(
        &self,
        request: &AdmissionRequest,
    ) -> Result<AdmissionResponse, AdmissionError> {
        let operation = request.operation;
        if operation == Operation::Other {
            return Ok(AdmissionResponse::allow());
        }

        let ctx = ResourceContext {
            group: request.kind.group.clone(),
            version: request.kind.version.clone(),
            resource: request.resource.clone(),
            namespace: request.namespace.clone(),
        };
        if !self.resolver.is_tracked(&ctx) {
            return Ok(AdmissionResponse::allow());
        }

        // Sub-resource writes never reach the decision pipeline. A status
        // write identifies the writer as a controller of this object; that
        // is the only path maintaining controller-hash sets.
        if !request.sub_resource.is_empty() {
            if operation == Operation::Update && request.sub_resource == "status" {
                self.record_status_writer(request);
            }
            return Ok(AdmissionResponse::allow());
        }

        // Metadata-only edits are pass-through.
        if operation == Operation::Update {
            if let (Some(old), Some(new)) = (&request.old_object, &request.object) {
                if !spec_changed(old, new) {
                    return Ok(AdmissionResponse::allow());
                }
            }
        }

        let (child, old_object) = self.parse_subject(request)?;
        let child_updaters = match operation {
            Operation::Create => HashList::new(),
            Operation::Update => old_object
                .as_ref()
                .and_then(|o| o.annotation(annotations::UPDATERS).map(HashList::parse))
                .unwrap_or_default(),
            // The deleted object is the old object.
            _ => child
                .annotation(annotations::UPDATERS)
                .map(HashList::parse)
                .unwrap_or_default(),
        };

        let principal = request.user.username.as_str();
        let assessment = self
            .detector
            .detect(&child, principal, &child_updaters)
            .await?;

        let mut audit = AuditTrail::new();
        audit.set(AUDIT_DRIFT, assessment.drift.to_string());
        if let Some(phase) = assessment.phase {
            audit.set(AUDIT_LIFECYCLE_PHASE, phase.to_string());
        }

        // Freeze wins over everything, including approvals, and is decided
        // before mode resolution.
        if let Some(parent) = &assessment.parent {
            if let Some(freeze) = Freeze::from_parent(parent) {
                let message = freeze_message(&freeze);
                audit.set(AUDIT_DECISION, "denied");
                self.log_decision(request, &assessment, "denied", &message);
                let mut response = AdmissionResponse::deny(message);
                response.audit_annotations = audit.into_map();
                return Ok(response);
            }
        }

        let mode = self.resolve_mode(&ctx, &child).await?;
        audit.set(AUDIT_MODE, mode.to_string());

        let mut warnings: Vec<String> = Vec::new();
        let mut denial: Option<String> = None;
        if assessment.drift {
            let parent = assessment
                .parent
                .as_ref()
                .expect("drift implies a resolved parent");
            let check = approval::check(parent, child.kind(), child.name());
            if check.rejected {
                audit.set(AUDIT_DRIFT_RESOLUTION, "rejected");
                denial = Some(check.reason);
            } else if check.approved {
                audit.set(AUDIT_DRIFT_RESOLUTION, "approved");
            } else {
                audit.set(AUDIT_DRIFT_RESOLUTION, "unresolved");
                match mode {
                    Mode::Enforce => denial = Some(assessment.reason.clone()),
                    Mode::Log => warnings.push(assessment.reason.clone()),
                }
            }
        }

        // The trace is computed on deny paths too: it cannot be patched onto
        // an object that is not mutating, but the audit trail still carries
        // the snapshot.
        let trace = propagate(
            &child,
            assessment.parent.as_ref(),
            principal,
            &child_updaters,
            Utc::now(),
        );
        audit.set(AUDIT_TRACE, trace.to_json());

        let mut response = if let Some(reason) = denial {
            audit.set(AUDIT_DECISION, "denied");
            self.log_decision(request, &assessment, "denied", &reason);
            AdmissionResponse::deny(reason)
        } else {
            let decision = allowed_decision(&warnings);
            audit.set(AUDIT_DECISION, decision);
            self.log_decision(request, &assessment, decision, &assessment.reason);
            let mut response = AdmissionResponse::allow();
            if matches!(operation, Operation::Create | Operation::Update) {
                let mut entries = vec![(annotations::TRACE.to_owned(), trace.to_json())];
                if operation == Operation::Update {
                    let new_updaters = child
                        .annotation(annotations::UPDATERS)
                        .map(HashList::parse)
                        .unwrap_or_default();
                    let mut merged = child_updaters.merge(&new_updaters);
                    merged.insert(&hash_principal(principal));
                    entries.push((annotations::UPDATERS.to_owned(), merged.emit()));
                }
                let ops = annotation_patch(&child, &entries);
                if !ops.is_empty() {
                    response.patch = Some(ops);
                }
            }
            response.warnings = warnings;
            response
        };
        response.audit_annotations = audit.into_map();

        self.dispatch(request, &child, &assessment);

        Ok(response)
    }

    fn parse_subject(
        &self,
        request: &AdmissionRequest,
    ) -> Result<(Object, Option<Object>), AdmissionError> {
        let raw = if request.operation == Operation::Delete {
            &request.old_object
        } else {
            &request.object
        };
        let mut child = Object::from_value(raw.clone().ok_or(ObjectError::Empty)?)?;
        child.set_namespace_if_empty(&request.namespace);

        let old_object = if request.operation == Operation::Update {
            let old = request.old_object.clone().ok_or(ObjectError::Empty)?;
            Some(Object::from_value(old)?)
        } else {
            None
        };
        Ok((child, old_object))
    }

    /// Resolves the effective mode, fetching the namespace's annotations
    /// only when the object's own annotation does not already decide.
    async fn resolve_mode(
        &self,
        ctx: &ResourceContext,
        child: &Object,
    ) -> Result<Mode, AdmissionError> {
        let object_annotations = child.annotations();
        let object_decides = object_annotations
            .get(annotations::MODE)
            .is_some_and(|v| v.parse::<Mode>().is_ok());

        let namespace_annotations = if !object_decides && !ctx.namespace.is_empty() {
            self.store
                .get("Namespace", "", &ctx.namespace)
                .await?
                .map(|ns| ns.annotations())
                .unwrap_or_default()
        } else {
            Default::default()
        };

        Ok(effective_mode(
            self.resolver.as_ref(),
            ctx,
            &object_annotations,
            &namespace_annotations,
        ))
    }

    fn record_status_writer(&self, request: &AdmissionRequest) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let Some(raw) = request.object.clone() else {
            return;
        };
        let Ok(mut object) = Object::from_value(raw) else {
            tracing::warn!(
                name = %request.name,
                "unparseable object on status write, controller hash not recorded"
            );
            return;
        };
        object.set_namespace_if_empty(&request.namespace);

        // Controllers that publish a real observed generation need no
        // synthetic fallback.
        let synthetic = if object.status_observed_generation().is_none() {
            Some(object.generation())
        } else {
            None
        };
        recorder.record(object.to_ref(), &request.user.username, synthetic);
    }

    fn dispatch(&self, request: &AdmissionRequest, child: &Object, assessment: &DriftAssessment) {
        let (Some(dispatcher), Some(parent)) = (&self.dispatcher, &assessment.parent) else {
            return;
        };

        let new_object = if request.operation == Operation::Delete {
            request.old_object.clone()
        } else {
            request.object.clone()
        };
        dispatcher.observe(DriftObservation {
            drift: assessment.drift,
            parent: parent.reference.clone(),
            child: child.to_ref(),
            old_object: (request.operation == Operation::Update)
                .then(|| request.old_object.clone())
                .flatten(),
            new_object,
            request: RequestContext {
                user: request.user.username.clone(),
                groups: request.user.groups.clone(),
                uid: request.uid.clone(),
                field_manager: request.field_manager.clone(),
                operation: request.operation.as_str().to_owned(),
            },
            detection: DetectionContext {
                parent_generation: parent.generation,
                parent_observed_generation: parent.observed_generation.unwrap_or(0),
                is_controller: assessment
                    .identity
                    .is_some_and(|i| i.can_determine && i.is_controller),
                lifecycle_phase: assessment.phase.map(|p| p.to_string()).unwrap_or_default(),
            },
            snooze: parent.annotation(annotations::SNOOZE).map(String::from),
        });
    }

    fn log_decision(
        &self,
        request: &AdmissionRequest,
        assessment: &DriftAssessment,
        decision: &str,
        reason: &str,
    ) {
        let parent_kind = assessment
            .parent
            .as_ref()
            .map(|p| p.reference.kind.as_str())
            .unwrap_or("");
        let parent_name = assessment
            .parent
            .as_ref()
            .map(|p| p.reference.name.as_str())
            .unwrap_or("");
        if assessment.drift {
            tracing::warn!(
                operation = request.operation.as_str(),
                kind = %request.kind.kind,
                namespace = %request.namespace,
                name = %request.name,
                decision,
                drift = true,
                lifecycle_phase = %assessment.phase.map(|p| p.to_string()).unwrap_or_default(),
                parent_kind,
                parent_name,
                reason,
                "drift detected"
            );
        } else {
            tracing::debug!(
                operation = request.operation.as_str(),
                kind = %request.kind.kind,
                namespace = %request.namespace,
                name = %request.name,
                decision,
                drift = false,
                reason,
                "drift check passed"
            );
        }
    }
}

/// Whether the `spec` field differs between the old and new documents.
/// Metadata and status changes are invisible to this comparison.
fn spec_changed(old: &Value, new: &Value) -> bool {
    old.get("spec") != new.get("spec")
}

fn freeze_message(freeze: &Freeze) -> String {
    let mut message = format!("parent is frozen by {}", freeze.user);
    if !freeze.message.is_empty() {
        message.push_str(": ");
        message.push_str(&freeze.message);
    }
    message
}
