//! Thin adapter over the external job scheduler.

pub mod memory;
pub mod nomad;
pub mod types;

use async_trait::async_trait;
use orbit_common::OrbitResult;

pub use memory::MemoryScheduler;
pub use nomad::NomadClient;
pub use types::{
    Allocation, Evaluation, Job, JobStub, NodeRecord, RegisterResponse, PRIMARY_GROUP,
    PRIMARY_TASK,
};

/// Operations the control plane needs from the scheduler.
///
/// Lookups of unknown ids return `Ok(None)`; `Err` is reserved for transport
/// and decode failures.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit a job. A rejection by the scheduler is an `Err`.
    async fn register(&self, job: &Job) -> OrbitResult<RegisterResponse>;

    async fn job(&self, job_id: &str, namespace: &str) -> OrbitResult<Option<Job>>;

    /// All jobs of a namespace, including their metadata.
    async fn jobs(&self, namespace: &str) -> OrbitResult<Vec<JobStub>>;

    async fn allocations(&self, job_id: &str, namespace: &str) -> OrbitResult<Vec<Allocation>>;

    /// Allocation detail, including allocated resources.
    async fn allocation(&self, alloc_id: &str, namespace: &str) -> OrbitResult<Option<Allocation>>;

    async fn evaluations(&self, job_id: &str, namespace: &str) -> OrbitResult<Vec<Evaluation>>;

    /// Stop a job. With `purge == false` the job stays visible as `dead`
    /// until the scheduler garbage-collects it.
    async fn deregister(&self, job_id: &str, namespace: &str, purge: bool) -> OrbitResult<()>;

    async fn nodes(&self) -> OrbitResult<Vec<NodeRecord>>;
}
