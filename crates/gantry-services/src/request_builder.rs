use chrono::Utc;
use gantry_core::types::{JobRequest, JobRequestInputs, ResourceCriteria};
use gantry_engine::services::{ConversionFailure, RequestBuilder};
use uuid::Uuid;

/// Builds the domain job request from raw CLI inputs.
///
/// Everything that must hold before the first network call is checked here:
/// a usable job name, at least one cluster and one command tag, well-formed
/// environment keys, a positive timeout. Tags are trimmed, de-duplicated,
/// and sorted so equivalent requests resolve identically.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliRequestBuilder;

impl CliRequestBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl RequestBuilder for CliRequestBuilder {
    fn build(&self, inputs: &JobRequestInputs) -> Result<JobRequest, ConversionFailure> {
        let name = inputs.job_name.trim();
        if name.is_empty() {
            return Err(ConversionFailure::MissingField("job_name"));
        }

        let cluster_tags = normalize_tags(&inputs.cluster_tags);
        if cluster_tags.is_empty() {
            return Err(ConversionFailure::MissingField("cluster_tags"));
        }
        let command_tags = normalize_tags(&inputs.command_tags);
        if command_tags.is_empty() {
            return Err(ConversionFailure::MissingField("command_tags"));
        }

        for key in inputs.env.keys() {
            if key.is_empty() || key.contains('=') || key.chars().any(char::is_whitespace) {
                return Err(ConversionFailure::InvalidField {
                    field: "env",
                    reason: format!("environment key {key:?} is not well formed"),
                });
            }
        }

        if inputs.timeout_secs == Some(0) {
            return Err(ConversionFailure::InvalidField {
                field: "timeout_secs",
                reason: "timeout must be positive".into(),
            });
        }

        Ok(JobRequest {
            id: Uuid::new_v4(),
            name: name.to_string(),
            criteria: ResourceCriteria {
                cluster_tags,
                command_tags,
            },
            command_args: inputs.command_args.clone(),
            env: inputs.env.clone(),
            timeout_secs: inputs.timeout_secs,
            metadata: inputs.metadata.clone(),
            requested_at: Utc::now(),
        })
    }
}

/// Trim, drop empties, de-duplicate, sort.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    cleaned.sort();
    cleaned.dedup();
    cleaned
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
