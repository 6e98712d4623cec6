pub mod config;
pub mod deployment;
pub mod error;
pub mod kind;
pub mod organization;

pub use config::{ConfigGroups, Param, PartialConfig, ReferenceConfig, ResolvedConfig};
pub use deployment::{
    ClusterStats, CreateOutcome, Deployment, DeploymentResources, DeploymentStatus, NodeCapacity,
};
pub use error::{OrbitError, OrbitResult};
pub use kind::DeploymentKind;
pub use organization::{Organization, TenantClass};

pub mod auth;
pub mod telemetry;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
