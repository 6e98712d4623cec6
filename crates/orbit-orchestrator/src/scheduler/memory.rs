//! In-process scheduler backend for development mode and tests.
//!
//! Jobs are accepted as submitted and never placed on their own: placement,
//! placement failures and client status changes are driven explicitly through
//! the helper methods.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use orbit_common::{now_ms, OrbitError, OrbitResult};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{
    AllocMetric, AllocatedCpu, AllocatedDevice, AllocatedMemory, AllocatedResources,
    AllocatedSharedResources, AllocatedTaskResources, Allocation, Evaluation, Job, JobStub,
    NodeRecord, RegisterResponse, TaskEvent, TaskState, PRIMARY_GROUP, PRIMARY_TASK,
};
use super::Scheduler;

#[derive(Debug, Clone, Default)]
pub struct MemoryScheduler {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<AtomicI64>,
    register_calls: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: BTreeMap<(String, String), JobEntry>,
    nodes: Vec<NodeRecord>,
    reject_next: Option<String>,
}

#[derive(Debug)]
struct JobEntry {
    job: Job,
    allocations: Vec<Allocation>,
    evaluations: Vec<Evaluation>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(AtomicI64::new(now_ms() as i64 * 1_000_000)),
            ..Self::default()
        }
    }

    pub async fn with_nodes(self, nodes: Vec<NodeRecord>) -> Self {
        self.inner.write().await.nodes = nodes;
        self
    }

    /// Strictly increasing timestamp in nanoseconds.
    fn tick(&self) -> i64 {
        self.clock.fetch_add(1_000, Ordering::Relaxed) + 1_000
    }

    /// Number of `register` calls received, accepted or not.
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::Relaxed)
    }

    /// Make the next registration fail with `message`.
    pub async fn reject_next_register(&self, message: &str) {
        self.inner.write().await.reject_next = Some(message.to_string());
    }

    /// Place a job, creating a new allocation with the given client status.
    pub async fn place(&self, job_id: &str, namespace: &str, client_status: &str) -> OrbitResult<String> {
        let create_time = self.tick();
        let mut inner = self.inner.write().await;
        let node_id = inner
            .nodes
            .iter()
            .find(|n| n.is_schedulable())
            .map(|n| n.id.clone())
            .unwrap_or_else(|| "node-local".to_string());

        let entry = inner
            .jobs
            .get_mut(&(namespace.to_string(), job_id.to_string()))
            .ok_or_else(|| OrbitError::NotFound(format!("job '{job_id}'")))?;

        let alloc = Allocation {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            node_id,
            namespace: namespace.to_string(),
            task_group: PRIMARY_GROUP.to_string(),
            client_status: client_status.to_string(),
            desired_status: "run".to_string(),
            create_time,
            task_states: BTreeMap::new(),
            allocated_resources: Some(allocated_from_job(&entry.job)),
        };
        let alloc_id = alloc.id.clone();
        entry.allocations.push(alloc);
        entry.job.status = Some("running".to_string());
        Ok(alloc_id)
    }

    /// Record an evaluation that could not place the primary group.
    pub async fn fail_placement(&self, job_id: &str, namespace: &str, metric: AllocMetric) -> OrbitResult<()> {
        let create_time = self.tick();
        let mut inner = self.inner.write().await;
        let entry = inner
            .jobs
            .get_mut(&(namespace.to_string(), job_id.to_string()))
            .ok_or_else(|| OrbitError::NotFound(format!("job '{job_id}'")))?;

        entry.evaluations.push(Evaluation {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            status: "complete".to_string(),
            status_description: String::new(),
            create_time,
            failed_tg_allocs: BTreeMap::from([(PRIMARY_GROUP.to_string(), metric)]),
        });
        Ok(())
    }

    /// Change the client status of an allocation. A message is recorded as a
    /// task event of the primary task.
    pub async fn set_client_status(&self, alloc_id: &str, client_status: &str, message: Option<&str>) -> OrbitResult<()> {
        let time = self.tick();
        let mut inner = self.inner.write().await;
        let alloc = inner
            .jobs
            .values_mut()
            .flat_map(|e| e.allocations.iter_mut())
            .find(|a| a.id == alloc_id)
            .ok_or_else(|| OrbitError::NotFound(format!("allocation '{alloc_id}'")))?;

        alloc.client_status = client_status.to_string();
        let state = alloc.task_states.entry(PRIMARY_TASK.to_string()).or_default();
        state.state = match client_status {
            "running" => "running",
            "pending" => "pending",
            _ => "dead",
        }
        .to_string();
        state.failed = client_status == "failed";
        if let Some(msg) = message {
            state.events.push(TaskEvent {
                event_type: if state.failed { "Terminated" } else { "Received" }.to_string(),
                display_message: msg.to_string(),
                time,
            });
        }
        Ok(())
    }

    fn stub(job: &Job) -> JobStub {
        JobStub {
            id: job.id.clone(),
            name: job.name.clone(),
            namespace: job.namespace.clone(),
            status: job.status.clone().unwrap_or_default(),
            stop: job.stop,
            meta: job.meta.clone(),
            submit_time: job.submit_time.unwrap_or_default(),
        }
    }
}

/// What the scheduler would reserve for the primary task of `job`.
fn allocated_from_job(job: &Job) -> AllocatedResources {
    let mut tasks = BTreeMap::new();
    if let Some(task) = job.primary_task() {
        let devices = task
            .resources
            .devices
            .iter()
            .filter(|d| d.is_gpu() && d.count > 0)
            .map(|d| {
                let model = d
                    .constraints
                    .iter()
                    .find(|c| c.l_target == "${device.model}")
                    .map(|c| c.r_target.clone())
                    .unwrap_or_else(|| "Generic GPU".to_string());
                AllocatedDevice {
                    vendor: "nvidia".to_string(),
                    device_type: "gpu".to_string(),
                    name: model,
                    device_ids: (0..d.count).map(|i| format!("GPU-{i}")).collect(),
                }
            })
            .collect();

        tasks.insert(
            PRIMARY_TASK.to_string(),
            AllocatedTaskResources {
                cpu: AllocatedCpu {
                    cpu_shares: 0,
                    reserved_cores: (0..task.resources.cores.max(0) as u32).collect(),
                },
                memory: AllocatedMemory {
                    memory_mb: task.resources.memory_mb,
                },
                devices,
            },
        );
    }

    let disk_mb = job
        .primary_group()
        .and_then(|g| g.ephemeral_disk.as_ref())
        .map(|d| d.size_mb)
        .unwrap_or_default();

    AllocatedResources {
        tasks,
        shared: AllocatedSharedResources { disk_mb },
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn register(&self, job: &Job) -> OrbitResult<RegisterResponse> {
        self.register_calls.fetch_add(1, Ordering::Relaxed);
        let submit_time = self.tick();
        let mut inner = self.inner.write().await;

        if let Some(msg) = inner.reject_next.take() {
            return Err(OrbitError::scheduler(msg));
        }
        if job.id.is_empty() || job.namespace.is_empty() {
            return Err(OrbitError::scheduler("job id and namespace are required"));
        }

        let mut stored = job.clone();
        stored.status = Some("pending".to_string());
        stored.submit_time = Some(submit_time);

        let eval = Evaluation {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            status: "complete".to_string(),
            status_description: String::new(),
            create_time: submit_time,
            failed_tg_allocs: BTreeMap::new(),
        };
        let eval_id = eval.id.clone();

        inner.jobs.insert(
            (job.namespace.clone(), job.id.clone()),
            JobEntry {
                job: stored,
                allocations: Vec::new(),
                evaluations: vec![eval],
            },
        );

        Ok(RegisterResponse {
            eval_id,
            warnings: String::new(),
        })
    }

    async fn job(&self, job_id: &str, namespace: &str) -> OrbitResult<Option<Job>> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .get(&(namespace.to_string(), job_id.to_string()))
            .map(|e| e.job.clone()))
    }

    async fn jobs(&self, namespace: &str) -> OrbitResult<Vec<JobStub>> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, e)| Self::stub(&e.job))
            .collect())
    }

    async fn allocations(&self, job_id: &str, namespace: &str) -> OrbitResult<Vec<Allocation>> {
        let inner = self.inner.read().await;
        let Some(entry) = inner.jobs.get(&(namespace.to_string(), job_id.to_string())) else {
            return Ok(Vec::new());
        };
        // listings do not carry allocated resources
        Ok(entry
            .allocations
            .iter()
            .map(|a| Allocation {
                allocated_resources: None,
                ..a.clone()
            })
            .collect())
    }

    async fn allocation(&self, alloc_id: &str, namespace: &str) -> OrbitResult<Option<Allocation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .flat_map(|(_, e)| e.allocations.iter())
            .find(|a| a.id == alloc_id)
            .cloned())
    }

    async fn evaluations(&self, job_id: &str, namespace: &str) -> OrbitResult<Vec<Evaluation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .get(&(namespace.to_string(), job_id.to_string()))
            .map(|e| e.evaluations.clone())
            .unwrap_or_default())
    }

    async fn deregister(&self, job_id: &str, namespace: &str, purge: bool) -> OrbitResult<()> {
        let mut inner = self.inner.write().await;
        let key = (namespace.to_string(), job_id.to_string());
        if purge {
            return inner
                .jobs
                .remove(&key)
                .map(|_| ())
                .ok_or_else(|| OrbitError::NotFound(format!("job '{job_id}'")));
        }

        let entry = inner
            .jobs
            .get_mut(&key)
            .ok_or_else(|| OrbitError::NotFound(format!("job '{job_id}'")))?;
        // the status stays as is until the allocations have drained
        entry.job.stop = true;
        for alloc in &mut entry.allocations {
            alloc.desired_status = "stop".to_string();
            if matches!(alloc.client_status.as_str(), "pending" | "running") {
                alloc.client_status = "complete".to_string();
            }
        }
        Ok(())
    }

    async fn nodes(&self) -> OrbitResult<Vec<NodeRecord>> {
        Ok(self.inner.read().await.nodes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::types::{Resources, Task, TaskGroup};

    fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            name: format!("userjob-{id}"),
            namespace: "ns".to_string(),
            task_groups: vec![TaskGroup {
                name: PRIMARY_GROUP.to_string(),
                count: 1,
                tasks: vec![Task {
                    name: PRIMARY_TASK.to_string(),
                    resources: Resources {
                        cores: 2,
                        memory_mb: 4000,
                        ..Resources::default()
                    },
                    ..Task::default()
                }],
                ..TaskGroup::default()
            }],
            ..Job::default()
        }
    }

    #[tokio::test]
    async fn test_register_then_place() {
        let s = MemoryScheduler::new();
        s.register(&job("a")).await.unwrap();
        assert_eq!(s.register_calls(), 1);
        assert!(s.allocations("a", "ns").await.unwrap().is_empty());

        let alloc_id = s.place("a", "ns", "pending").await.unwrap();
        let detail = s.allocation(&alloc_id, "ns").await.unwrap().unwrap();
        let res = detail.allocated_resources.unwrap();
        assert_eq!(res.tasks[PRIMARY_TASK].cpu.reserved_cores.len(), 2);
        assert_eq!(res.tasks[PRIMARY_TASK].memory.memory_mb, 4000);

        let listed = s.allocations("a", "ns").await.unwrap();
        assert!(listed[0].allocated_resources.is_none());
    }

    #[tokio::test]
    async fn test_deregister_stops_job() {
        let s = MemoryScheduler::new();
        s.register(&job("a")).await.unwrap();
        s.deregister("a", "ns", false).await.unwrap();

        let j = s.job("a", "ns").await.unwrap().unwrap();
        assert!(j.stop);
        assert_eq!(j.status.as_deref(), Some("pending"));
        assert!(j.is_dead());
        assert!(s.jobs("ns").await.unwrap()[0].is_dead());
        assert!(s.job("a", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_register() {
        let s = MemoryScheduler::new();
        s.reject_next_register("no capacity").await;
        let err = s.register(&job("a")).await.unwrap_err();
        assert_eq!(err, OrbitError::scheduler("no capacity"));
        assert!(s.job("a", "ns").await.unwrap().is_none());
        s.register(&job("a")).await.unwrap();
    }
}
