//! Deployment orchestration over an external job scheduler.
//!
//! [`Orchestrator`] is the entry point: it resolves a tenant's configuration,
//! enforces quotas, allocates hostnames, builds the job and submits it, and
//! projects the scheduler's state back into [`orbit_common::Deployment`].

pub mod cluster;
pub mod config_resolver;
pub mod domain;
pub mod jobspec;
pub mod lifecycle;
pub mod ownership;
pub mod quota;
pub mod scheduler;
pub mod service;
pub mod settings;

pub use cluster::ClusterInfo;
pub use domain::{DomainAllocator, DomainProbe, HttpDomainProbe, ProbeResponse};
pub use jobspec::{JobSpecBuilder, RegistryAuth};
pub use lifecycle::DeploymentTracker;
pub use ownership::OwnershipGuard;
pub use quota::QuotaPolicy;
pub use scheduler::{MemoryScheduler, NomadClient, Scheduler};
pub use service::{DeploymentRequest, Orchestrator};
pub use settings::{ReferenceCatalog, Settings};
