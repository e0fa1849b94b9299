use gantry_core::types::{JobRequest, JobSpecification};
use gantry_engine::services::{ResolutionFailure, SpecificationResolver};
use std::time::Duration;
use tracing::debug;

/// Resolves job specifications against the central service over HTTP.
///
/// POST `{base_url}/api/v1/jobs/resolve` with the serialized request; a 200
/// answers with the specification JSON. Server rejections map onto the
/// domain failure kinds; anything transport-shaped (5xx, network, decode)
/// maps to [`ResolutionFailure::Transport`].
pub struct HttpSpecificationResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSpecificationResolver {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: trim_base(base_url.into()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v1/jobs/resolve", self.base_url)
    }
}

#[async_trait::async_trait]
impl SpecificationResolver for HttpSpecificationResolver {
    async fn resolve(&self, request: &JobRequest) -> Result<JobSpecification, ResolutionFailure> {
        let url = self.endpoint();
        debug!(url = %url, job_id = %request.id, "posting resolution request");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ResolutionFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure_for_status(status.as_u16(), body));
        }

        response
            .json::<JobSpecification>()
            .await
            .map_err(|e| ResolutionFailure::Transport(format!("invalid specification body: {e}")))
    }
}

fn trim_base(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}

/// Map a rejection status onto the domain failure kinds: 404 means nothing
/// matched the criteria, 409 means the criteria conflict, other 4xx is a
/// plain rejection, everything else is transport.
fn failure_for_status(status: u16, body: String) -> ResolutionFailure {
    let detail = if body.is_empty() {
        format!("status {status}")
    } else {
        format!("status {status}: {body}")
    };
    match status {
        404 => ResolutionFailure::NoMatchingResources(detail),
        409 => ResolutionFailure::ConflictingCriteria(detail),
        400..=499 => ResolutionFailure::Rejected(detail),
        _ => ResolutionFailure::Transport(detail),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
