use std::sync::Arc;

use orbit_common::{DeploymentKind, OrbitError, OrbitResult};

use crate::scheduler::{Job, Scheduler};

/// Decide whether `owner` may see the job `job_id` in `namespace`.
///
/// Unknown, stopped or foreign-namespace jobs are `NotFound`. A job owned by
/// someone else is `NotOwner`, which renders the same as `NotFound` so the
/// caller cannot tell whether the job exists. With `kind` set, a job of
/// another kind is `NotFound` as well.
pub fn check_access(
    job: Option<Job>,
    job_id: &str,
    namespace: &str,
    owner: &str,
    kind: Option<DeploymentKind>,
) -> OrbitResult<Job> {
    let not_found = || OrbitError::deployment_not_found(job_id);

    let job = job.ok_or_else(not_found)?;
    if job.is_dead() || job.namespace != namespace {
        return Err(not_found());
    }
    if job.meta("owner") != Some(owner) {
        return Err(OrbitError::not_owner(job_id));
    }
    if let Some(kind) = kind {
        if job.meta("kind") != Some(kind.as_str()) {
            return Err(not_found());
        }
    }
    Ok(job)
}

/// Fetches a job and checks access before anything else looks at it.
#[derive(Clone)]
pub struct OwnershipGuard {
    scheduler: Arc<dyn Scheduler>,
}

impl OwnershipGuard {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn authorize(
        &self,
        job_id: &str,
        namespace: &str,
        owner: &str,
        kind: Option<DeploymentKind>,
    ) -> OrbitResult<Job> {
        let job = self.scheduler.job(job_id, namespace).await?;
        check_access(job, job_id, namespace, owner, kind).inspect_err(|e| {
            if matches!(e, OrbitError::NotOwner(_)) {
                tracing::info!(job_id, namespace, tenant = owner, "access to foreign deployment denied");
            }
        })
    }
}
