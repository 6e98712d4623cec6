//! Deployment operations as seen by an authenticated tenant.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use orbit_common::auth::AuthContext;
use orbit_common::{
    ClusterStats, CreateOutcome, Deployment, DeploymentKind, DeploymentStatus, OrbitError,
    OrbitResult, Organization, PartialConfig, ReferenceConfig,
};
use orbit_meta::MetaStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cluster::ClusterInfo;
use crate::config_resolver::resolve;
use crate::domain::{DomainAllocator, DomainProbe};
use crate::jobspec::{routed_labels, BuildContext, JobSpecBuilder, PlacementHints, RegistryAuth};
use crate::lifecycle::{latest_allocation, DeploymentTracker};
use crate::quota::{requested_resources, QuotaPolicy, HARDWARE};
use crate::scheduler::Scheduler;
use crate::settings::{ReferenceCatalog, Settings};

/// A tenant's request to create a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub organization: String,
    pub kind: DeploymentKind,
    #[serde(default)]
    pub config: PartialConfig,
}

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Statuses whose resources count against tenant-wise ceilings.
fn holds_resources(status: &DeploymentStatus) -> bool {
    matches!(
        status,
        DeploymentStatus::Queued
            | DeploymentStatus::Error
            | DeploymentStatus::Starting
            | DeploymentStatus::Running
    )
}

pub struct Orchestrator {
    scheduler: Arc<dyn Scheduler>,
    settings: Settings,
    catalog: ReferenceCatalog,
    domains: DomainAllocator,
    builder: JobSpecBuilder,
    tracker: DeploymentTracker,
    cluster: ClusterInfo,
    node_id: [u8; 6],
}

impl Orchestrator {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        settings: Settings,
        probe: Arc<dyn DomainProbe>,
        cache: Arc<dyn MetaStore>,
    ) -> OrbitResult<Self> {
        Ok(Self {
            catalog: ReferenceCatalog::embedded()?,
            domains: DomainAllocator::new(probe, settings.reserved_subdomains.clone()),
            builder: JobSpecBuilder::new(settings.datacenters.clone(), None),
            tracker: DeploymentTracker::new(scheduler.clone()),
            cluster: ClusterInfo::new(scheduler.clone(), cache, DEFAULT_CACHE_TTL),
            node_id: host_node_id(),
            scheduler,
            settings,
        })
    }

    /// Credentials injected into jobs whose image lives on `registry.host`.
    pub fn with_registry(mut self, registry: Option<RegistryAuth>) -> Self {
        self.builder = JobSpecBuilder::new(self.settings.datacenters.clone(), registry);
        self
    }

    /// How long cluster capacity views are served from the cache.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cluster = self.cluster.with_ttl(ttl);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn organization(&self, ctx: &AuthContext, name: &str) -> OrbitResult<&Organization> {
        let org = self.settings.organization(name)?;
        if !ctx.is_member(name) {
            tracing::info!(tenant = %ctx.tenant_id, organization = name, "not a member");
            return Err(OrbitError::Ownership(format!(
                "you are not a member of organization '{name}'"
            )));
        }
        Ok(org)
    }

    fn policy(&self, org: &Organization) -> QuotaPolicy {
        QuotaPolicy::new(self.settings.quota_class(org.class))
    }

    fn new_job_id(&self) -> String {
        Uuid::now_v1(&self.node_id).to_string()
    }

    /// Reference configuration of `kind` as the organization's tenants see
    /// it: class overrides applied and GPU models taken from the cluster.
    pub async fn reference_config(
        &self,
        ctx: &AuthContext,
        organization: &str,
        kind: DeploymentKind,
    ) -> OrbitResult<ReferenceConfig> {
        let org = self.organization(ctx, organization)?;
        let mut reference = self.catalog.get(kind)?;
        self.policy(org).apply_overrides(&mut reference);

        let gpus_allowed = reference
            .param(HARDWARE, "gpu_num")
            .and_then(|p| p.range)
            .is_some_and(|[_, max]| max > 0.0);
        if gpus_allowed {
            match self.cluster.gpu_models().await {
                Ok(models) => {
                    if let Some(param) = reference.param_mut(HARDWARE, "gpu_type") {
                        let mut options = vec![json!("")];
                        options.extend(models.into_iter().map(Value::from));
                        param.options = Some(options);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "GPU models unavailable, keeping reference options"),
            }
        }
        Ok(reference)
    }

    /// Validate, check quotas, allocate a hostname and submit a job.
    ///
    /// Errors abort before anything reaches the scheduler. A rejection by the
    /// scheduler itself comes back as [`CreateOutcome::Fail`].
    pub async fn create(&self, ctx: &AuthContext, req: DeploymentRequest) -> OrbitResult<CreateOutcome> {
        let kind = req.kind;
        let owner = ctx.tenant_id.as_str();
        let org = self.organization(ctx, &req.organization)?;
        let policy = self.policy(org);

        let mut reference = self.catalog.get(kind)?;
        policy.apply_overrides(&mut reference);
        let resolved = resolve(&req.config, &reference)?;
        policy.check_jobwise(&resolved, &reference).inspect_err(|e| {
            tracing::info!(tenant = owner, kind = %kind, error = %e, "job-wise quota rejected");
        })?;

        if policy.ceilings(kind).is_some() {
            // snapshot of active deployments; a concurrent create is not counted
            let active: Vec<_> = self
                .tracker
                .list(&org.namespace, owner, kind)
                .await?
                .into_iter()
                .filter(|d| holds_resources(&d.status))
                .map(|d| d.resources)
                .collect();
            policy
                .check_userwise(kind, &requested_resources(&resolved), &active)
                .inspect_err(|e| {
                    tracing::info!(tenant = owner, kind = %kind, error = %e, "tenant-wise quota rejected");
                })?;
        }

        let job_id = self.new_job_id();

        let domain = if kind.is_routable() {
            let domain = self
                .domains
                .allocate(resolved.str("general", "hostname"), &org.domain, &job_id)?;
            self.domains.ensure_available(&domain, routed_labels(kind)).await?;
            Some(domain)
        } else {
            None
        };

        let placement = if kind == DeploymentKind::Snapshot {
            let source = resolved
                .str("general", "source_job_id")
                .ok_or_else(|| OrbitError::validation("'general.source_job_id' is required"))?;
            self.snapshot_placement(source, &org.namespace, owner).await?
        } else {
            PlacementHints::default()
        };

        let build_ctx = BuildContext {
            job_id: job_id.clone(),
            namespace: org.namespace.clone(),
            owner: owner.to_string(),
            priority: self.settings.priority(org.class),
            domain,
            retention_secs: self.settings.retention_secs(kind),
            placement,
        };
        let job = self.builder.build(kind, &resolved, &build_ctx)?;

        match self.scheduler.register(&job).await {
            Ok(resp) => {
                tracing::info!(
                    job_id = %job_id,
                    namespace = %org.namespace,
                    kind = %kind,
                    tenant = owner,
                    eval_id = %resp.eval_id,
                    "deployment submitted"
                );
                Ok(CreateOutcome::Success { job_id })
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, namespace = %org.namespace, kind = %kind, error = %e, "scheduler rejected job");
                Ok(CreateOutcome::Fail {
                    error_msg: e.to_string(),
                })
            }
        }
    }

    /// Where a snapshot of `source` must run: the node of its latest
    /// allocation, which must be running.
    async fn snapshot_placement(&self, source: &str, namespace: &str, owner: &str) -> OrbitResult<PlacementHints> {
        let job = self.tracker.guard().authorize(source, namespace, owner, None).await?;
        let source_kind = job.meta("kind").and_then(|k| k.parse::<DeploymentKind>().ok());
        if !matches!(source_kind, Some(DeploymentKind::Module | DeploymentKind::Tool)) {
            return Err(OrbitError::validation(format!(
                "deployment '{source}' cannot be snapshotted"
            )));
        }

        let allocations = self.scheduler.allocations(source, namespace).await?;
        let alloc = latest_allocation(&allocations)
            .filter(|a| a.client_status == "running")
            .ok_or_else(|| OrbitError::validation(format!("deployment '{source}' is not running")))?;
        let node_id = match self.scheduler.allocation(&alloc.id, namespace).await? {
            Some(detail) => detail.node_id,
            None => alloc.node_id.clone(),
        };
        if node_id.is_empty() {
            return Err(OrbitError::validation(format!(
                "deployment '{source}' is not placed on any node"
            )));
        }

        Ok(PlacementHints {
            source_job_id: Some(source.to_string()),
            alloc_id: Some(alloc.id.clone()),
            node_id: Some(node_id),
        })
    }

    pub async fn get(
        &self,
        ctx: &AuthContext,
        organization: &str,
        kind: DeploymentKind,
        job_id: &str,
    ) -> OrbitResult<Deployment> {
        let org = self.organization(ctx, organization)?;
        self.tracker.get(job_id, &org.namespace, &ctx.tenant_id, kind).await
    }

    pub async fn list(
        &self,
        ctx: &AuthContext,
        organization: &str,
        kind: DeploymentKind,
    ) -> OrbitResult<Vec<Deployment>> {
        let org = self.organization(ctx, organization)?;
        self.tracker.list(&org.namespace, &ctx.tenant_id, kind).await
    }

    pub async fn delete(
        &self,
        ctx: &AuthContext,
        organization: &str,
        kind: DeploymentKind,
        job_id: &str,
    ) -> OrbitResult<()> {
        let org = self.organization(ctx, organization)?;
        self.tracker.delete(job_id, &org.namespace, &ctx.tenant_id, kind).await
    }

    pub async fn gpu_models(&self) -> OrbitResult<Vec<String>> {
        self.cluster.gpu_models().await
    }

    pub async fn cluster_stats(&self) -> OrbitResult<ClusterStats> {
        self.cluster.stats().await
    }
}

/// Node id for time-based job ids, derived from the host name. The multicast
/// bit marks it as not being a MAC address (RFC 4122, section 4.5).
fn host_node_id() -> [u8; 6] {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "orbit".to_string());
    let mut hasher = DefaultHasher::new();
    host.hash(&mut hasher);
    let h = hasher.finish().to_be_bytes();
    [h[0] | 0x01, h[1], h[2], h[3], h[4], h[5]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses() {
        assert!(holds_resources(&DeploymentStatus::Queued));
        assert!(holds_resources(&DeploymentStatus::Error));
        assert!(!holds_resources(&DeploymentStatus::Failed));
        assert!(!holds_resources(&DeploymentStatus::Other("complete".into())));
    }

    #[test]
    fn test_job_ids_are_time_based_and_distinct() {
        let node = host_node_id();
        let a = Uuid::now_v1(&node);
        let b = Uuid::now_v1(&node);
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 1);
    }
}
