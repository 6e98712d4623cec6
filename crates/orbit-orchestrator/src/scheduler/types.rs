//! Typed projections of the scheduler's records.
//!
//! Field names follow the scheduler's JSON encoding (PascalCase). Job
//! documents keep every field they do not model in `extra`, so a job read
//! back from the scheduler can be resubmitted without loss. Read-only records
//! (allocations, evaluations, nodes) decode only what this crate consumes.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Name of the task that carries the tenant's workload.
pub const PRIMARY_TASK: &str = "usertask";
/// Name of the task group holding the primary task and its auxiliary tasks.
pub const PRIMARY_GROUP: &str = "usergroup";

/// The scheduler encodes empty collections as `null`.
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

// ── Job specification ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Job {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(rename = "Type", default)]
    pub job_type: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub datacenters: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub constraints: Vec<Constraint>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub affinities: Vec<Affinity>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub task_groups: Vec<TaskGroup>,
    /// `pending`, `running` or `dead`; set by the scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Set by a non-purging deregister. `status` only turns `dead` once the
    /// allocations have drained.
    #[serde(default)]
    pub stop: bool,
    /// Nanoseconds since the epoch; set by the scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Stopped by its owner or finished.
    pub fn is_dead(&self) -> bool {
        self.stop || self.status.as_deref() == Some("dead")
    }

    pub fn group(&self, name: &str) -> Option<&TaskGroup> {
        self.task_groups.iter().find(|g| g.name == name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut TaskGroup> {
        self.task_groups.iter_mut().find(|g| g.name == name)
    }

    pub fn primary_group(&self) -> Option<&TaskGroup> {
        self.group(PRIMARY_GROUP)
    }

    pub fn primary_group_mut(&mut self) -> Option<&mut TaskGroup> {
        self.group_mut(PRIMARY_GROUP)
    }

    pub fn primary_task(&self) -> Option<&Task> {
        self.primary_group().and_then(|g| g.task(PRIMARY_TASK))
    }

    pub fn primary_task_mut(&mut self) -> Option<&mut Task> {
        self.primary_group_mut().and_then(|g| g.task_mut(PRIMARY_TASK))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(rename = "LTarget", default)]
    pub l_target: String,
    #[serde(rename = "Operand", default)]
    pub operand: String,
    #[serde(rename = "RTarget", default)]
    pub r_target: String,
}

impl Constraint {
    pub fn new(l_target: &str, operand: &str, r_target: &str) -> Self {
        Self {
            l_target: l_target.to_string(),
            operand: operand.to_string(),
            r_target: r_target.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Affinity {
    #[serde(rename = "LTarget", default)]
    pub l_target: String,
    #[serde(rename = "Operand", default)]
    pub operand: String,
    #[serde(rename = "RTarget", default)]
    pub r_target: String,
    #[serde(rename = "Weight", default)]
    pub weight: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskGroup {
    pub name: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<Task>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub networks: Vec<Network>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<Service>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_disk: Option<EphemeralDisk>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskGroup {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn task_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    #[serde(default)]
    pub attempts: i64,
    #[serde(default)]
    pub mode: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EphemeralDisk {
    #[serde(rename = "SizeMB", default)]
    pub size_mb: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Network {
    #[serde(default)]
    pub mode: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dynamic_ports: Vec<Port>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reserved_ports: Vec<Port>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Port {
    pub label: String,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub to: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub port_label: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub driver: String,
    /// Driver configuration (image, command, args, auth...).
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default, deserialize_with = "null_as_default")]
    pub templates: Vec<Template>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn image(&self) -> Option<&str> {
        self.config.get("image").and_then(Value::as_str)
    }

    /// Launch arguments of the container, as strings.
    pub fn args(&self) -> Vec<&str> {
        self.config
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(rename = "Cores", default)]
    pub cores: i64,
    #[serde(rename = "MemoryMB", default)]
    pub memory_mb: i64,
    #[serde(rename = "Devices", default, deserialize_with = "null_as_default")]
    pub devices: Vec<Device>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Device {
    pub name: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub constraints: Vec<Constraint>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Device {
    pub fn is_gpu(&self) -> bool {
        self.name == "gpu" || self.name.ends_with("/gpu")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    pub embedded_tmpl: String,
    pub dest_path: String,
    #[serde(default)]
    pub perms: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Lifecycle {
    pub hook: String,
    #[serde(default)]
    pub sidecar: bool,
}

/// Answer to a job registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterResponse {
    #[serde(rename = "EvalID", default)]
    pub eval_id: String,
    #[serde(default)]
    pub warnings: String,
}

/// Entry of a job listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobStub {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub stop: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub submit_time: i64,
}

impl JobStub {
    pub fn is_dead(&self) -> bool {
        self.stop || self.status == "dead"
    }
}

// ── Allocations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Allocation {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "JobID", default)]
    pub job_id: String,
    #[serde(rename = "NodeID", default)]
    pub node_id: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub task_group: String,
    /// `pending`, `running`, `complete`, `failed`, `lost`, `unknown`.
    #[serde(default)]
    pub client_status: String,
    #[serde(default)]
    pub desired_status: String,
    /// Nanoseconds since the epoch.
    #[serde(default)]
    pub create_time: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub task_states: BTreeMap<String, TaskState>,
    /// Only present on allocation detail reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_resources: Option<AllocatedResources>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<TaskEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskEvent {
    #[serde(rename = "Type", default)]
    pub event_type: String,
    #[serde(default)]
    pub display_message: String,
    #[serde(default)]
    pub time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocatedResources {
    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: BTreeMap<String, AllocatedTaskResources>,
    #[serde(default)]
    pub shared: AllocatedSharedResources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocatedTaskResources {
    #[serde(default)]
    pub cpu: AllocatedCpu,
    #[serde(default)]
    pub memory: AllocatedMemory,
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<AllocatedDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocatedCpu {
    #[serde(default)]
    pub cpu_shares: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reserved_cores: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocatedMemory {
    #[serde(rename = "MemoryMB", default)]
    pub memory_mb: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocatedDevice {
    #[serde(default)]
    pub vendor: String,
    #[serde(rename = "Type", default)]
    pub device_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "DeviceIDs", default, deserialize_with = "null_as_default")]
    pub device_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocatedSharedResources {
    #[serde(rename = "DiskMB", default)]
    pub disk_mb: i64,
}

// ── Evaluations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Evaluation {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "JobID", default)]
    pub job_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_description: String,
    /// Nanoseconds since the epoch.
    #[serde(default)]
    pub create_time: i64,
    /// Placement failures, keyed by task group name.
    #[serde(rename = "FailedTGAllocs", default, deserialize_with = "null_as_default")]
    pub failed_tg_allocs: BTreeMap<String, AllocMetric>,
}

/// Why the scheduler could not place a task group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocMetric {
    #[serde(default)]
    pub nodes_evaluated: i64,
    #[serde(default)]
    pub nodes_filtered: i64,
    #[serde(default)]
    pub nodes_exhausted: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub constraint_filtered: BTreeMap<String, i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dimension_exhausted: BTreeMap<String, i64>,
}

// ── Nodes ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub node_class: String,
    /// `ready`, `down`, `initializing`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub scheduling_eligibility: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_resources: Option<NodeResources>,
}

impl NodeRecord {
    pub fn is_schedulable(&self) -> bool {
        self.status == "ready" && self.scheduling_eligibility != "ineligible"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeResources {
    #[serde(default)]
    pub cpu: NodeCpu,
    #[serde(default)]
    pub memory: AllocatedMemory,
    #[serde(default)]
    pub disk: AllocatedSharedResources,
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<NodeDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeCpu {
    #[serde(default)]
    pub cpu_shares: i64,
    #[serde(default)]
    pub total_cpu_cores: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeDevice {
    #[serde(default)]
    pub vendor: String,
    #[serde(rename = "Type", default)]
    pub device_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub instances: Vec<DeviceInstance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInstance {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_keeps_unknown_fields() {
        let raw = json!({
            "ID": "j1",
            "Name": "userjob-j1",
            "Type": "service",
            "Region": "global",
            "Constraints": null,
            "TaskGroups": [{
                "Name": "usergroup",
                "Count": 1,
                "Tasks": [{"Name": "usertask", "Driver": "docker", "Config": {"image": "a/b:1"}, "KillTimeout": 30}]
            }]
        });
        let job: Job = serde_json::from_value(raw).unwrap();
        assert!(job.constraints.is_empty());
        assert_eq!(job.extra.get("Region"), Some(&json!("global")));
        assert_eq!(job.primary_task().and_then(Task::image), Some("a/b:1"));

        let back = serde_json::to_value(&job).unwrap();
        assert_eq!(back["Region"], json!("global"));
        assert_eq!(back["TaskGroups"][0]["Tasks"][0]["KillTimeout"], json!(30));
    }

    #[test]
    fn test_constraint_wire_names() {
        let c = Constraint::new("${node.class}", "=", "compute");
        assert_eq!(
            serde_json::to_value(&c).unwrap(),
            json!({"LTarget": "${node.class}", "Operand": "=", "RTarget": "compute"})
        );
    }

    #[test]
    fn test_evaluation_failed_allocs_decode() {
        let raw = json!({
            "ID": "e1",
            "JobID": "j1",
            "Status": "complete",
            "CreateTime": 10,
            "FailedTGAllocs": {
                "usergroup": {"NodesEvaluated": 3, "NodesExhausted": 3, "DimensionExhausted": {"memory": 3}}
            }
        });
        let ev: Evaluation = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.failed_tg_allocs["usergroup"].dimension_exhausted["memory"], 3);
    }

    #[test]
    fn test_stopped_job_is_dead_before_draining() {
        let job: Job = serde_json::from_value(json!({
            "ID": "j1",
            "Name": "userjob-j1",
            "Status": "running",
            "Stop": true
        }))
        .unwrap();
        assert!(job.is_dead());

        let stub: JobStub = serde_json::from_value(json!({
            "ID": "j1",
            "Name": "userjob-j1",
            "Status": "running",
            "Stop": true
        }))
        .unwrap();
        assert!(stub.is_dead());

        let live: JobStub = serde_json::from_value(json!({"ID": "j2", "Name": "n", "Status": "running"})).unwrap();
        assert!(!live.is_dead());
    }
}
