//! Cluster capacity views, memoized in the metadata store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use orbit_common::{now_ms, ClusterStats, NodeCapacity, OrbitResult};
use orbit_meta::MetaStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::scheduler::{NodeRecord, Scheduler};

pub const GPU_MODELS_KEY: &str = "/orbit/cache/gpu-models";
pub const CLUSTER_STATS_KEY: &str = "/orbit/cache/cluster-stats";

#[derive(Clone)]
pub struct ClusterInfo {
    scheduler: Arc<dyn Scheduler>,
    cache: Arc<dyn MetaStore>,
    ttl_ms: u64,
}

impl ClusterInfo {
    pub fn new(scheduler: Arc<dyn Scheduler>, cache: Arc<dyn MetaStore>, ttl: Duration) -> Self {
        Self {
            scheduler,
            cache,
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// GPU models present on schedulable nodes, sorted.
    pub async fn gpu_models(&self) -> OrbitResult<Vec<String>> {
        self.memoized(GPU_MODELS_KEY, || async {
            let nodes = self.scheduler.nodes().await?;
            let mut models: Vec<String> = nodes
                .iter()
                .filter(|n| n.is_schedulable())
                .flat_map(|n| node_capacity(n).gpu_models)
                .collect();
            models.sort();
            models.dedup();
            Ok(models)
        })
        .await
    }

    /// Per-node capacity. Totals only count schedulable nodes.
    pub async fn stats(&self) -> OrbitResult<ClusterStats> {
        self.memoized(CLUSTER_STATS_KEY, || async {
            let nodes = self.scheduler.nodes().await?;
            Ok(aggregate(&nodes))
        })
        .await
    }

    /// Read `key` from the cache, or compute and store it. A broken cache
    /// only costs a recomputation.
    async fn memoized<T, F, Fut>(&self, key: &str, compute: F) -> OrbitResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrbitResult<T>>,
    {
        match self.cache.get(key).await {
            Ok(Some((bytes, _))) => match serde_json::from_slice(&bytes) {
                Ok(value) => return Ok(value),
                Err(e) => tracing::warn!(key, error = %e, "discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(key, error = %e, "cache read failed"),
        }

        let value = compute().await?;
        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                if let Err(e) = self.cache.put(key, bytes, Some(self.ttl_ms)).await {
                    tracing::warn!(key, error = %e, "cache write failed");
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "cache encode failed"),
        }
        Ok(value)
    }
}

pub fn node_capacity(node: &NodeRecord) -> NodeCapacity {
    let mut out = NodeCapacity {
        node_id: node.id.clone(),
        name: node.name.clone(),
        node_class: node.node_class.clone(),
        status: node.status.clone(),
        ..NodeCapacity::default()
    };
    if let Some(res) = &node.node_resources {
        out.cpu_total = res.cpu.total_cpu_cores;
        out.memory_total_mb = res.memory.memory_mb.max(0) as u64;
        out.disk_total_mb = res.disk.disk_mb.max(0) as u64;
        for device in res.devices.iter().filter(|d| d.device_type == "gpu") {
            let healthy = device.instances.iter().filter(|i| i.healthy).count() as u32;
            out.gpu_total += healthy;
            if healthy > 0 && !out.gpu_models.contains(&device.name) {
                out.gpu_models.push(device.name.clone());
            }
        }
    }
    out
}

pub fn aggregate(nodes: &[NodeRecord]) -> ClusterStats {
    let mut stats = ClusterStats {
        computed_at_ms: now_ms(),
        ..ClusterStats::default()
    };
    for node in nodes {
        let cap = node_capacity(node);
        if node.is_schedulable() {
            stats.cpu_total += cap.cpu_total;
            stats.memory_total_mb += cap.memory_total_mb;
            stats.disk_total_mb += cap.disk_total_mb;
            stats.gpu_total += cap.gpu_total;
        }
        stats.nodes.push(cap);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::types::{
        AllocatedMemory, AllocatedSharedResources, DeviceInstance, NodeCpu, NodeDevice,
        NodeResources,
    };
    use crate::scheduler::MemoryScheduler;
    use orbit_meta::MemoryMetaStore;

    fn gpu_node(id: &str, status: &str, model: &str, gpus: usize) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            name: id.to_string(),
            node_class: "compute".to_string(),
            status: status.to_string(),
            scheduling_eligibility: "eligible".to_string(),
            node_resources: Some(NodeResources {
                cpu: NodeCpu {
                    cpu_shares: 0,
                    total_cpu_cores: 16,
                },
                memory: AllocatedMemory { memory_mb: 64000 },
                disk: AllocatedSharedResources { disk_mb: 500000 },
                devices: vec![NodeDevice {
                    vendor: "nvidia".to_string(),
                    device_type: "gpu".to_string(),
                    name: model.to_string(),
                    instances: (0..gpus)
                        .map(|i| DeviceInstance {
                            id: format!("GPU-{i}"),
                            healthy: true,
                        })
                        .collect(),
                }],
            }),
        }
    }

    #[test]
    fn test_aggregate_counts_schedulable_nodes_only() {
        let stats = aggregate(&[
            gpu_node("n1", "ready", "Tesla T4", 2),
            gpu_node("n2", "down", "A100", 4),
        ]);
        assert_eq!(stats.nodes.len(), 2);
        assert_eq!(stats.cpu_total, 16);
        assert_eq!(stats.gpu_total, 2);
        assert_eq!(stats.nodes[1].gpu_models, vec!["A100".to_string()]);
    }

    #[tokio::test]
    async fn test_gpu_models_are_memoized() {
        let scheduler = MemoryScheduler::new()
            .with_nodes(vec![
                gpu_node("n1", "ready", "Tesla T4", 1),
                gpu_node("n2", "ready", "A100", 1),
                gpu_node("n3", "ready", "Tesla T4", 1),
            ])
            .await;
        let cache = Arc::new(MemoryMetaStore::new());
        let info = ClusterInfo::new(Arc::new(scheduler), cache.clone(), Duration::from_secs(60));

        let models = info.gpu_models().await.unwrap();
        assert_eq!(models, vec!["A100".to_string(), "Tesla T4".to_string()]);

        cache
            .put(GPU_MODELS_KEY, serde_json::to_vec(&vec!["cached"]).unwrap(), None)
            .await
            .unwrap();
        assert_eq!(info.gpu_models().await.unwrap(), vec!["cached".to_string()]);
    }

    #[tokio::test]
    async fn test_undecodable_cache_entry_is_recomputed() {
        let scheduler = MemoryScheduler::new()
            .with_nodes(vec![gpu_node("n1", "ready", "Tesla T4", 1)])
            .await;
        let cache = Arc::new(MemoryMetaStore::new());
        cache.put(CLUSTER_STATS_KEY, b"not json".to_vec(), None).await.unwrap();

        let info = ClusterInfo::new(Arc::new(scheduler), cache, Duration::from_secs(60));
        assert_eq!(info.stats().await.unwrap().gpu_total, 1);
    }
}
