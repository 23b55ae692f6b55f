//! The sync engine: lifecycle operations and the rank and move protocols.
//!
//! Every operation follows the same shape: validate, package one
//! [`Request`], await the single reply, then merge the authoritative record
//! back into the entity graph and fire events. Nothing in the graph is
//! touched before the reply arrives, so a failed call leaves the graph
//! exactly as it was and needs no rollback.
//!
//! Failures are returned as `Err` and also reported to the [`FeedbackSink`]
//! with the entity's description as context.

pub mod lifecycle;
pub mod moving;
pub mod rank;

use std::sync::Arc;

use crate::entity::{EntityRef, RequestTicket};
use crate::events::{Event, NotifyReport};
use crate::feedback::{Feedback, FeedbackSink};
use crate::models::EntityId;
use crate::protocol::{Reply, Request};
use crate::registry::Registry;
use crate::transport::Transport;
use crate::{Error, Result};

/// Engine behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Drop a response if a newer one for the same entity was already applied
    pub discard_stale_responses: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            discard_stale_responses: true,
        }
    }
}

/// Result of an operation that merges a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The response was merged into the graph
    Applied,
    /// The response was older than one already applied and was dropped
    Stale,
}

/// Result of [`SyncEngine::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing changed; no request was sent
    Unchanged,
    /// The entity was created remotely and received this identifier
    Created(EntityId),
    /// The changed fields were stored
    Updated,
    /// The response was older than one already applied and was dropped
    Stale,
}

/// Coordinates transport, registry and feedback for entity operations.
pub struct SyncEngine {
    transport: Arc<dyn Transport>,
    registry: Arc<dyn Registry>,
    feedback: Arc<dyn FeedbackSink>,
    config: EngineConfig,
}

impl SyncEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<dyn Registry>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Self {
        Self {
            transport,
            registry,
            feedback,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Send one request, reporting failure with `context`.
    async fn call(&self, context: &str, request: Request) -> Result<Reply> {
        let operation = request.operation();
        tracing::debug!("{} {} via {}", operation, context, request.endpoint());
        match self.transport.send(request).await {
            Ok(reply) => Ok(reply),
            Err(err) => Err(self.report_failure(context, err)),
        }
    }

    /// Log and report a failure, handing the error back for propagation.
    fn report_failure(&self, context: &str, err: Error) -> Error {
        tracing::warn!("{}: {}", context, err);
        self.feedback.report(Feedback::error(err.to_string(), context));
        err
    }

    fn report_success(&self, context: &str, message: impl Into<String>) {
        self.feedback.report(Feedback::success(message, context));
    }

    /// Decide whether a response may be applied to `entity`.
    fn admit(&self, entity: &EntityRef, ticket: RequestTicket, operation: &str) -> bool {
        if entity.accept_response(ticket) {
            return true;
        }
        if self.config.discard_stale_responses {
            tracing::warn!(
                "discarding stale {} response for {:?} (request #{})",
                operation,
                entity,
                ticket.value()
            );
            false
        } else {
            tracing::warn!(
                "applying stale {} response for {:?} (request #{})",
                operation,
                entity,
                ticket.value()
            );
            true
        }
    }

    /// The entity's identifier, or a reported `NotPersisted` error.
    fn require_id(&self, entity: &EntityRef, operation: &str) -> Result<EntityId> {
        entity.id().ok_or_else(|| {
            self.report_failure(
                &entity.describe(),
                Error::NotPersisted(format!("cannot {} an entity that was never saved", operation)),
            )
        })
    }

    /// Deliver an event to `target`'s listeners and log failures.
    fn notify(&self, target: &EntityRef, event: Event) -> NotifyReport {
        let report = target.notify(&event);
        if !report.is_clean() {
            tracing::warn!(
                "{} of {} listeners of {:?} failed on {}",
                report.failures.len(),
                report.failures.len() + report.delivered,
                target,
                event.kind().as_str()
            );
        }
        report
    }
}

/// Identity comparison of two optional handles.
fn same_entity(a: &Option<EntityRef>, b: &Option<EntityRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
