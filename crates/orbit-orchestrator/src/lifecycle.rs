//! Deployment read model, recomputed from the scheduler on every call.
//!
//! Nothing here is stored: status, resources and endpoints are projected from
//! the job, its allocations and its evaluations as the scheduler reports them.

use std::collections::BTreeMap;
use std::sync::Arc;

use orbit_common::{
    Deployment, DeploymentKind, DeploymentResources, DeploymentStatus, OrbitError, OrbitResult,
};

use crate::ownership::OwnershipGuard;
use crate::scheduler::types::{AllocMetric, Evaluation};
use crate::scheduler::{Allocation, Job, Scheduler, PRIMARY_TASK};

const UNINFORMATIVE_EXIT: &str = "Docker container exited with non-zero exit code";
const GENERIC_EXIT: &str =
    "The container exited with an error. Contact the module owner to report the problem.";
const UNKNOWN_FAILURE: &str = "The deployment failed without a reason.";

/// Launch flag of the primary task and the endpoint it serves.
const MAIN_ENDPOINTS: [(&str, &str); 5] = [
    ("deepaas", "api"),
    ("fedserver", "api"),
    ("jupyter", "ide"),
    ("vscode", "ide"),
    ("gradio", "ui"),
];

/// Most recently created allocation.
pub fn latest_allocation(allocations: &[Allocation]) -> Option<&Allocation> {
    allocations.iter().max_by_key(|a| a.create_time)
}

fn latest_evaluation(evaluations: &[Evaluation]) -> Option<&Evaluation> {
    evaluations.iter().max_by_key(|e| e.create_time)
}

/// Status and error message of a deployment.
///
/// With an allocation, its client status decides. Without one, the latest
/// evaluation decides: placement failures make it `error`, otherwise the job
/// is still `queued`.
pub fn derive_status(
    allocations: &[Allocation],
    evaluations: &[Evaluation],
) -> (DeploymentStatus, Option<String>) {
    if let Some(alloc) = latest_allocation(allocations) {
        return match alloc.client_status.as_str() {
            "pending" => (DeploymentStatus::Starting, None),
            "running" => (DeploymentStatus::Running, None),
            "failed" => (DeploymentStatus::Failed, Some(failure_message(alloc))),
            other => (DeploymentStatus::Other(other.to_string()), None),
        };
    }

    match latest_evaluation(evaluations) {
        Some(eval) if !eval.failed_tg_allocs.is_empty() => {
            (DeploymentStatus::Error, Some(placement_failure(eval)))
        }
        _ => (DeploymentStatus::Queued, None),
    }
}

/// Human readable account of why the scheduler could not place the job.
pub fn placement_failure(eval: &Evaluation) -> String {
    eval.failed_tg_allocs
        .iter()
        .map(|(group, metric)| describe_metric(group, metric))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_metric(group: &str, m: &AllocMetric) -> String {
    let counts = |map: &BTreeMap<String, i64>| {
        map.iter()
            .map(|(k, n)| format!("{k} ({n})"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut out = format!(
        "could not place '{group}': {} nodes evaluated, {} filtered, {} exhausted",
        m.nodes_evaluated, m.nodes_filtered, m.nodes_exhausted
    );
    if !m.dimension_exhausted.is_empty() {
        out.push_str(&format!("; exhausted: {}", counts(&m.dimension_exhausted)));
    }
    if !m.constraint_filtered.is_empty() {
        out.push_str(&format!("; filtered by: {}", counts(&m.constraint_filtered)));
    }
    out
}

/// Last message reported by a failed task of the allocation, preferring the
/// primary task.
pub fn failure_message(alloc: &Allocation) -> String {
    let failed = alloc
        .task_states
        .get(PRIMARY_TASK)
        .filter(|s| s.failed)
        .or_else(|| alloc.task_states.values().find(|s| s.failed));

    let message = failed.and_then(|state| {
        state
            .events
            .iter()
            .filter(|e| !e.display_message.is_empty())
            .max_by_key(|e| e.time)
            .map(|e| e.display_message.as_str())
    });

    match message {
        None => UNKNOWN_FAILURE.to_string(),
        Some(m) if m.starts_with(UNINFORMATIVE_EXIT) => GENERIC_EXIT.to_string(),
        Some(m) => m.to_string(),
    }
}

/// Hardware of a deployment. Uses what the scheduler actually allocated when
/// an allocation detail is available, and the job's request otherwise.
pub fn resources(job: &Job, detail: Option<&Allocation>) -> DeploymentResources {
    let allocated = detail
        .and_then(|a| a.allocated_resources.as_ref())
        .and_then(|r| r.tasks.get(PRIMARY_TASK).map(|t| (t, r.shared.disk_mb)));

    if let Some((task, disk_mb)) = allocated {
        let gpus: Vec<_> = task.devices.iter().filter(|d| d.device_type == "gpu").collect();
        let mut gpu_models: Vec<String> = gpus.iter().map(|d| d.name.clone()).collect();
        gpu_models.dedup();
        return DeploymentResources {
            cpu_num: task.cpu.reserved_cores.len() as u32,
            memory_mb: task.memory.memory_mb.max(0) as u64,
            disk_mb: disk_mb.max(0) as u64,
            gpu_num: gpus.iter().map(|d| d.device_ids.len() as u32).sum(),
            gpu_models,
        };
    }

    let mut out = DeploymentResources {
        disk_mb: job
            .primary_group()
            .and_then(|g| g.ephemeral_disk.as_ref())
            .map(|d| d.size_mb.max(0) as u64)
            .unwrap_or_default(),
        ..DeploymentResources::default()
    };
    if let Some(task) = job.primary_task() {
        out.cpu_num = task.resources.cores.max(0) as u32;
        out.memory_mb = task.resources.memory_mb.max(0) as u64;
        for device in task.resources.devices.iter().filter(|d| d.is_gpu()) {
            out.gpu_num += device.count.max(0) as u32;
            out.gpu_models.extend(
                device
                    .constraints
                    .iter()
                    .filter(|c| c.l_target == "${device.model}")
                    .map(|c| c.r_target.clone()),
            );
        }
    }
    out
}

/// Public URLs keyed by port label, and the label of the main one.
pub fn endpoints(job: &Job) -> (BTreeMap<String, String>, Option<String>) {
    let mut out = BTreeMap::new();
    let mut first = None;
    let domain = job.meta("domain");

    for service in job.primary_group().map(|g| g.services.as_slice()).unwrap_or_default() {
        let label = &service.port_label;
        if label.is_empty() {
            continue;
        }
        let url = service
            .tags
            .iter()
            .find_map(|t| routed_host(t))
            .map(|host| format!("https://{host}"))
            .or_else(|| domain.map(|d| format!("https://{label}-{d}")));
        if let Some(url) = url {
            first.get_or_insert_with(|| label.clone());
            out.insert(label.clone(), url);
        }
    }

    let by_flag = job.primary_task().and_then(|task| {
        task.args().into_iter().find_map(|arg| {
            let flag = arg.trim_start_matches('-').split('=').next().unwrap_or_default();
            MAIN_ENDPOINTS
                .iter()
                .find(|(f, _)| *f == flag)
                .map(|(_, label)| label.to_string())
        })
    });
    let main = by_flag.filter(|l| out.contains_key(l)).or(first);
    (out, main)
}

/// Host of a proxy routing rule ``Host(`app.example.eu`)`` inside a tag.
fn routed_host(tag: &str) -> Option<&str> {
    let start = tag.find("Host(`")? + "Host(`".len();
    let rest = &tag[start..];
    let end = rest.find('`')?;
    Some(&rest[..end]).filter(|h| !h.is_empty())
}

/// Assemble the read model of one deployment.
pub fn project(
    job: &Job,
    kind: DeploymentKind,
    allocations: &[Allocation],
    evaluations: &[Evaluation],
    detail: Option<&Allocation>,
) -> Deployment {
    let (status, error_msg) = derive_status(allocations, evaluations);
    let (endpoints, main_endpoint) = endpoints(job);
    let docker_image = job
        .meta("docker_image")
        .map(str::to_string)
        .or_else(|| job.primary_task().and_then(|t| t.image()).map(str::to_string));

    Deployment {
        job_id: job.id.clone(),
        namespace: job.namespace.clone(),
        owner: job.meta("owner").unwrap_or_default().to_string(),
        kind,
        name: job.name.clone(),
        title: job.meta("title").unwrap_or_default().to_string(),
        description: job.meta("description").unwrap_or_default().to_string(),
        status,
        error_msg,
        resources: resources(job, detail),
        endpoints,
        main_endpoint,
        alloc_id: latest_allocation(allocations).map(|a| a.id.clone()),
        docker_image,
        submit_time_ms: job.submit_time.map(|t| (t.max(0) / 1_000_000) as u64).unwrap_or_default(),
    }
}

/// Reads and stops deployments on behalf of their owners.
#[derive(Clone)]
pub struct DeploymentTracker {
    scheduler: Arc<dyn Scheduler>,
    guard: OwnershipGuard,
}

impl DeploymentTracker {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            guard: OwnershipGuard::new(scheduler.clone()),
            scheduler,
        }
    }

    pub fn guard(&self) -> &OwnershipGuard {
        &self.guard
    }

    pub async fn get(
        &self,
        job_id: &str,
        namespace: &str,
        owner: &str,
        kind: DeploymentKind,
    ) -> OrbitResult<Deployment> {
        let job = self.guard.authorize(job_id, namespace, owner, Some(kind)).await?;
        self.describe(&job, kind).await
    }

    /// Live deployments of `owner` of one kind, newest first.
    pub async fn list(
        &self,
        namespace: &str,
        owner: &str,
        kind: DeploymentKind,
    ) -> OrbitResult<Vec<Deployment>> {
        let mut stubs: Vec<_> = self
            .scheduler
            .jobs(namespace)
            .await?
            .into_iter()
            .filter(|j| !j.is_dead())
            .filter(|j| j.meta.get("owner").map(String::as_str) == Some(owner))
            .filter(|j| j.meta.get("kind").map(String::as_str) == Some(kind.as_str()))
            .collect();
        stubs.sort_by(|a, b| b.submit_time.cmp(&a.submit_time));

        let mut out = Vec::with_capacity(stubs.len());
        for stub in stubs {
            match self.get(&stub.id, namespace, owner, kind).await {
                Ok(d) => out.push(d),
                // stopped between the listing and the read
                Err(OrbitError::NotFound(_)) => {
                    tracing::warn!(job_id = %stub.id, namespace, "deployment vanished while listing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Stop a deployment. The job stays in the scheduler flagged as stopped
    /// and is hidden from every read from then on.
    pub async fn delete(
        &self,
        job_id: &str,
        namespace: &str,
        owner: &str,
        kind: DeploymentKind,
    ) -> OrbitResult<()> {
        self.guard.authorize(job_id, namespace, owner, Some(kind)).await?;
        self.scheduler.deregister(job_id, namespace, false).await?;
        tracing::info!(job_id, namespace, tenant = owner, kind = %kind, "deployment stopped");
        Ok(())
    }

    /// Latest allocation of a job with its allocated resources.
    pub async fn latest_allocation_detail(&self, job: &Job) -> OrbitResult<Option<Allocation>> {
        let allocations = self.scheduler.allocations(&job.id, &job.namespace).await?;
        self.detail_of(latest_allocation(&allocations), &job.namespace).await
    }

    async fn detail_of(&self, latest: Option<&Allocation>, namespace: &str) -> OrbitResult<Option<Allocation>> {
        let Some(latest) = latest else {
            return Ok(None);
        };
        let detail = self.scheduler.allocation(&latest.id, namespace).await?;
        Ok(Some(detail.unwrap_or_else(|| latest.clone())))
    }

    async fn describe(&self, job: &Job, kind: DeploymentKind) -> OrbitResult<Deployment> {
        let allocations = self.scheduler.allocations(&job.id, &job.namespace).await?;
        let evaluations = self.scheduler.evaluations(&job.id, &job.namespace).await?;
        let detail = self.detail_of(latest_allocation(&allocations), &job.namespace).await?;
        Ok(project(job, kind, &allocations, &evaluations, detail.as_ref()))
    }
}
