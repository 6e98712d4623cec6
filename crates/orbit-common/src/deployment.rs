use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kind::DeploymentKind;

/// UI-facing status of a deployment. Never stored; recomputed from the
/// scheduler on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum DeploymentStatus {
    /// Accepted by the scheduler, not placed and not failed to place yet.
    Queued,
    /// The scheduler could not place the job (e.g. resources exhausted).
    Error,
    /// Placed, the container is being pulled or started.
    Starting,
    Running,
    Failed,
    /// Any other allocation client status, passed through verbatim.
    Other(String),
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Error => "error",
            DeploymentStatus::Starting => "starting",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DeploymentStatus> for String {
    fn from(s: DeploymentStatus) -> Self {
        s.as_str().to_string()
    }
}

impl From<String> for DeploymentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => DeploymentStatus::Queued,
            "error" => DeploymentStatus::Error,
            "starting" => DeploymentStatus::Starting,
            "running" => DeploymentStatus::Running,
            "failed" => DeploymentStatus::Failed,
            _ => DeploymentStatus::Other(s),
        }
    }
}

/// Hardware actually reserved for (or requested by) a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResources {
    pub cpu_num: u32,
    /// MiB
    pub memory_mb: u64,
    /// MiB
    pub disk_mb: u64,
    pub gpu_num: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpu_models: Vec<String>,
}

/// Read model of a deployment, projected from the scheduler's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub job_id: String,
    pub namespace: String,
    pub owner: String,
    pub kind: DeploymentKind,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub resources: DeploymentResources,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    /// Label of the endpoint the UI opens by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alloc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    /// Submission time (ms since epoch).
    #[serde(default)]
    pub submit_time_ms: u64,
}

/// Result of a create call. A scheduler-side rejection is a `Fail` outcome,
/// not a transport error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CreateOutcome {
    Success {
        #[serde(rename = "job_ID")]
        job_id: String,
    },
    Fail {
        error_msg: String,
    },
}

impl CreateOutcome {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            CreateOutcome::Success { job_id } => Some(job_id),
            CreateOutcome::Fail { .. } => None,
        }
    }
}

/// Capacity and usage of one scheduler node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub node_id: String,
    pub name: String,
    pub node_class: String,
    pub status: String,
    pub cpu_total: u32,
    pub memory_total_mb: u64,
    pub disk_total_mb: u64,
    pub gpu_total: u32,
    #[serde(default)]
    pub gpu_models: Vec<String>,
}

/// Aggregated cluster capacity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub cpu_total: u32,
    pub memory_total_mb: u64,
    pub disk_total_mb: u64,
    pub gpu_total: u32,
    pub nodes: Vec<NodeCapacity>,
    /// When this snapshot was computed (ms since epoch).
    pub computed_at_ms: u64,
}
