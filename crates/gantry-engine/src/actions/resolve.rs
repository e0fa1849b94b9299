use crate::action::Action;
use crate::cancel::CancelSignal;
use crate::context::{ExecutionContext, StateFailure};
use crate::services::{RequestBuilder, ResolutionFailure, SpecificationResolver};
use crate::state::{Event, State};
use gantry_core::types::{JobRequest, JobSpecification};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Turns raw inputs into a [`JobRequest`], then negotiates the fully
/// resolved [`JobSpecification`] with the resolution service and stores it
/// on the context, exactly once.
///
/// Resolution is a one-shot negotiation: every [`ResolutionFailure`] kind is
/// fatal for the run, and any retrying belongs to the service side, not this
/// agent. A conversion failure is a local defect and equally fatal. The
/// remote call is bounded by the configured deadline and raced against
/// cancellation; neither outcome leaves a partial specification behind.
pub struct ResolveJobSpecificationAction {
    request_builder: Arc<dyn RequestBuilder>,
    resolver: Arc<dyn SpecificationResolver>,
    cancel: CancelSignal,
    resolve_timeout: Option<Duration>,
}

enum ResolveWait {
    Finished(Result<JobSpecification, ResolutionFailure>),
    DeadlineExceeded,
}

impl ResolveJobSpecificationAction {
    pub fn new(
        request_builder: Arc<dyn RequestBuilder>,
        resolver: Arc<dyn SpecificationResolver>,
        cancel: CancelSignal,
        resolve_timeout: Option<Duration>,
    ) -> Self {
        Self {
            request_builder,
            resolver,
            cancel,
            resolve_timeout,
        }
    }

    async fn resolve_bounded(&self, request: &JobRequest) -> ResolveWait {
        match self.resolve_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.resolver.resolve(request)).await
            {
                Ok(result) => ResolveWait::Finished(result),
                Err(_) => ResolveWait::DeadlineExceeded,
            },
            None => ResolveWait::Finished(self.resolver.resolve(request).await),
        }
    }
}

#[async_trait::async_trait]
impl Action for ResolveJobSpecificationAction {
    fn state(&self) -> State {
        State::ResolveJobSpecification
    }

    fn legal_events(&self) -> &'static [Event] {
        &[
            Event::ResolveJobSpecificationComplete,
            Event::ResolveJobSpecificationFailed,
            Event::JobCancelled,
            Event::JobTimedOut,
        ]
    }

    fn failure_event(&self) -> Event {
        Event::ResolveJobSpecificationFailed
    }

    async fn perform(&self, ctx: &mut ExecutionContext) -> Result<Event, StateFailure> {
        let request = self.request_builder.build(ctx.inputs()).map_err(|e| {
            StateFailure::with_source(
                State::ResolveJobSpecification,
                "failed to build job request from inputs",
                e,
            )
        })?;
        let job_id = request.id;
        ctx.set_job_request(request.clone()).map_err(|e| {
            StateFailure::with_source(
                State::ResolveJobSpecification,
                "job request written twice",
                e,
            )
        })?;

        info!(
            job_id = %job_id,
            cluster_tags = ?request.criteria.cluster_tags,
            command_tags = ?request.criteria.command_tags,
            "resolving job specification"
        );

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                info!(job_id = %job_id, "cancelled during specification resolution");
                ctx.mark_cancelled();
                return Ok(Event::JobCancelled);
            }
            outcome = self.resolve_bounded(&request) => outcome,
        };

        match outcome {
            ResolveWait::DeadlineExceeded => {
                warn!(
                    job_id = %job_id,
                    timeout = ?self.resolve_timeout,
                    "specification resolution deadline expired"
                );
                ctx.mark_timed_out();
                Ok(Event::JobTimedOut)
            }
            ResolveWait::Finished(Err(failure)) => Err(StateFailure::with_source(
                State::ResolveJobSpecification,
                "specification resolution failed",
                failure,
            )),
            ResolveWait::Finished(Ok(spec)) => {
                info!(
                    job_id = %job_id,
                    cluster = %spec.cluster.name,
                    command = %spec.command.name,
                    dependencies = spec.dependencies.len(),
                    "job specification resolved"
                );
                ctx.set_job_specification(spec).map_err(|e| {
                    StateFailure::with_source(
                        State::ResolveJobSpecification,
                        "job specification written twice",
                        e,
                    )
                })?;
                Ok(Event::ResolveJobSpecificationComplete)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
