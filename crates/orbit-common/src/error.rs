//! Error taxonomy shared by the orchestrator and the API.

/// Result type alias using [`OrbitError`].
pub type OrbitResult<T> = Result<T, OrbitError>;

/// Errors surfaced to callers of the deployment control plane.
///
/// A scheduler rejecting a well-formed job is not an error: it is reported as
/// `CreateOutcome::Fail`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrbitError {
    /// Malformed or unknown configuration keys, missing required values.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// A job-wise range or a tenant-wise aggregate ceiling was exceeded.
    #[error("quota exceeded for '{dimension}': {reason}")]
    Quota {
        /// Hardware dimension, e.g. `cpu_num`.
        dimension: String,
        /// Which bound was violated.
        reason: String,
    },

    /// The hostname is already served by another workload.
    #[error("domain '{0}' is already in use")]
    DomainConflict(String),

    /// Caller is not a member of the organization.
    #[error("{0}")]
    Ownership(String),

    /// The deployment belongs to another tenant. Renders exactly like a
    /// missing deployment.
    #[error("not found: {0}")]
    NotOwner(String),

    /// Unknown (or already deleted) deployment.
    #[error("not found: {0}")]
    NotFound(String),

    /// The job template could not be rendered.
    #[error("template error: {0}")]
    Template(String),

    /// Transport or decode failure talking to the scheduler.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Registry, storage or probe failure.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Invalid platform settings.
    #[error("configuration error: {0}")]
    Config(String),
}

impl OrbitError {
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    #[must_use]
    pub fn quota(dimension: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Quota {
            dimension: dimension.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }

    /// Ownership failure on a deployment owned by someone else.
    #[must_use]
    pub fn not_owner(job_id: &str) -> Self {
        Self::NotOwner(unknown_deployment(job_id))
    }

    /// Unknown, stopped or foreign-namespace deployment.
    #[must_use]
    pub fn deployment_not_found(job_id: &str) -> Self {
        Self::NotFound(unknown_deployment(job_id))
    }

    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            OrbitError::Validation(_) => "validation_error",
            OrbitError::Quota { .. } => "quota_exceeded",
            OrbitError::DomainConflict(_) => "domain_conflict",
            OrbitError::Ownership(_) => "forbidden",
            OrbitError::NotOwner(_) | OrbitError::NotFound(_) => "not_found",
            OrbitError::Template(_) => "template_error",
            OrbitError::Scheduler(_) => "scheduler_error",
            OrbitError::Upstream(_) => "upstream_error",
            OrbitError::Config(_) => "config_error",
        }
    }
}

fn unknown_deployment(job_id: &str) -> String {
    format!("deployment '{job_id}' does not exist or you are not its owner")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_message_names_dimension() {
        let e = OrbitError::quota("cpu_num", "8 is above the maximum 4");
        assert_eq!(e.to_string(), "quota exceeded for 'cpu_num': 8 is above the maximum 4");
        assert_eq!(e.code(), "quota_exceeded");
    }

    #[test]
    fn test_foreign_deployment_reads_as_missing() {
        let foreign = OrbitError::not_owner("j1");
        let missing = OrbitError::deployment_not_found("j1");
        assert_ne!(foreign, missing);
        assert_eq!(foreign.to_string(), missing.to_string());
        assert_eq!(foreign.code(), missing.code());
    }
}
