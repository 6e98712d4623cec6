//! Job specification builder.
//!
//! Each kind has a JSON template in `templates/`. A build renders the
//! template from the resolved configuration, then applies the kind's edits
//! from [`transforms`].

pub mod render;
pub mod transforms;

use orbit_common::{DeploymentKind, OrbitError, OrbitResult, ResolvedConfig};
use serde_json::{json, Value};

use crate::quota::HARDWARE;
use crate::scheduler::types::{Job, PRIMARY_TASK};
pub use render::Placeholders;
pub use transforms::RegistryAuth;

const STORAGE_CREDENTIALS: [&str; 3] = ["rclone_url", "rclone_user", "rclone_password"];

fn template(kind: DeploymentKind) -> &'static str {
    match kind {
        DeploymentKind::Module | DeploymentKind::Tool => include_str!("../../templates/service.json"),
        DeploymentKind::Batch => include_str!("../../templates/batch.json"),
        DeploymentKind::Inference => include_str!("../../templates/inference.json"),
        DeploymentKind::TryMe => include_str!("../../templates/try-me.json"),
        DeploymentKind::Snapshot => include_str!("../../templates/snapshot.json"),
    }
}

/// Port labels routed as `{label}-{domain}` for a kind.
pub fn routed_labels(kind: DeploymentKind) -> &'static [&'static str] {
    match kind {
        DeploymentKind::Module | DeploymentKind::Tool => &["api", "monitor", "ide"],
        DeploymentKind::TryMe => &["ui"],
        _ => &[],
    }
}

/// Where a job must run, when it depends on another deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementHints {
    pub source_job_id: Option<String>,
    pub alloc_id: Option<String>,
    pub node_id: Option<String>,
}

/// Identity and platform values that do not come from the tenant's
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub job_id: String,
    pub namespace: String,
    pub owner: String,
    pub priority: i64,
    /// Allocated hostname, for routable kinds.
    pub domain: Option<String>,
    pub retention_secs: Option<u64>,
    pub placement: PlacementHints,
}

#[derive(Debug, Clone, Default)]
pub struct JobSpecBuilder {
    datacenters: Vec<String>,
    registry: Option<RegistryAuth>,
}

impl JobSpecBuilder {
    pub fn new(datacenters: Vec<String>, registry: Option<RegistryAuth>) -> Self {
        Self {
            datacenters,
            registry,
        }
    }

    pub fn build(
        &self,
        kind: DeploymentKind,
        resolved: &ResolvedConfig,
        ctx: &BuildContext,
    ) -> OrbitResult<Job> {
        let missing_credentials: Vec<String> = STORAGE_CREDENTIALS
            .iter()
            .filter(|k| transforms::is_blank(resolved.get("storage", k)))
            .map(|k| format!("storage.{k}"))
            .collect();
        let has_storage = missing_credentials.is_empty();
        let datasets = resolved.string_list("storage", "datasets");
        let script = resolved.str("general", "script");

        if kind == DeploymentKind::Batch {
            if !has_storage {
                return Err(OrbitError::validation(format!(
                    "batch deployments need storage credentials, missing: {}",
                    missing_credentials.join(", ")
                )));
            }
            if script.is_none() {
                return Err(OrbitError::validation("batch deployments need a script"));
            }
        }
        if !datasets.is_empty() && !has_storage {
            return Err(OrbitError::validation(
                "downloading datasets needs storage credentials",
            ));
        }
        let pin = match kind {
            DeploymentKind::Snapshot => Some(ctx.placement.node_id.as_deref().ok_or_else(|| {
                OrbitError::validation("the deployment to snapshot is not placed on any node")
            })?),
            _ => None,
        };

        let doc = render::render(template(kind), &self.placeholders(kind, resolved, ctx))?;
        let mut job: Job = serde_json::from_value(doc)
            .map_err(|e| OrbitError::Template(format!("rendered {kind} job is malformed: {e}")))?;

        if kind != DeploymentKind::Snapshot {
            transforms::set_gpu_request(
                &mut job,
                resolved.integer(HARDWARE, "gpu_num").unwrap_or(0),
                resolved.str(HARDWARE, "gpu_type"),
            );
        }

        match kind {
            DeploymentKind::Module | DeploymentKind::Tool => {}
            DeploymentKind::Batch => {
                transforms::strip_networking(&mut job);
                transforms::inline_entrypoint_script(&mut job, script.unwrap_or_default());
                transforms::disable_restarts(&mut job);
                transforms::relax_node_class(&mut job);
                transforms::prefer_batch_nodes(&mut job);
            }
            DeploymentKind::Inference | DeploymentKind::TryMe => {
                transforms::set_retention(&mut job, ctx.retention_secs.unwrap_or(0));
            }
            DeploymentKind::Snapshot => {
                if let Some(node) = pin {
                    transforms::pin_to_node(&mut job, node);
                }
            }
        }

        if !datasets.is_empty() {
            transforms::add_dataset_downloads(&mut job, &datasets);
        }
        if !has_storage {
            transforms::strip_storage_tasks(&mut job);
        }
        if let Some(registry) = &self.registry {
            transforms::apply_registry_auth(&mut job, registry);
        }

        check_primary(&job)?;
        Ok(job)
    }

    fn placeholders(&self, kind: DeploymentKind, resolved: &ResolvedConfig, ctx: &BuildContext) -> Placeholders {
        let mut p = Placeholders::new();
        p.set("JOB_UUID", ctx.job_id.as_str());
        p.set("JOB_NAME", format!("{kind}-{}", ctx.job_id));
        p.set("NAMESPACE", ctx.namespace.as_str());
        p.set("OWNER", ctx.owner.as_str());
        p.set("KIND", kind.as_str());
        p.set("PRIORITY", ctx.priority);
        p.set("DATACENTERS", json!(self.datacenters));
        p.set(
            "REGISTRY_HOST",
            self.registry.as_ref().map(|r| r.host.as_str()).unwrap_or_default(),
        );

        for (group, params) in &resolved.0 {
            for (key, value) in params {
                let name = placeholder_name(key);
                let numeric = (group == HARDWARE)
                    .then(|| resolved.integer(group, key))
                    .flatten();
                match (numeric, value) {
                    (Some(n), _) => p.set(&name, n),
                    (None, Value::Array(_) | Value::Object(_)) => {}
                    (None, _) => p.set(&name, resolved.text(group, key)),
                }
            }
        }

        if let Some(domain) = &ctx.domain {
            p.set("DOMAIN", domain.as_str());
        }
        if let Some(alloc_id) = &ctx.placement.alloc_id {
            p.set("TARGET_ALLOC_ID", alloc_id.as_str());
        }
        if let Some(source) = &ctx.placement.source_job_id {
            p.set("SOURCE_JOB_ID", source.as_str());
        }
        p
    }
}

fn placeholder_name(key: &str) -> String {
    match key {
        "gpu_type" => "GPU_MODEL".to_string(),
        "rclone_conf" => "RCLONE_CONFIG".to_string(),
        "desc" => "DESCRIPTION".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

/// Exactly one task group carries the primary task.
fn check_primary(job: &Job) -> OrbitResult<()> {
    let carriers = job
        .task_groups
        .iter()
        .filter(|g| g.task(PRIMARY_TASK).is_some())
        .count();
    if carriers == 1 {
        Ok(())
    } else {
        Err(OrbitError::Template(format!(
            "job must have exactly one group with '{PRIMARY_TASK}', found {carriers}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_resolver::resolve;
    use crate::settings::ReferenceCatalog;
    use orbit_common::PartialConfig;

    fn ctx() -> BuildContext {
        BuildContext {
            job_id: "0b8e4a2c-0000-11ef-8000-0242ac120002".into(),
            namespace: "example".into(),
            owner: "alice".into(),
            priority: 50,
            domain: Some("myapp.deployments.example.eu".into()),
            retention_secs: Some(600),
            placement: PlacementHints::default(),
        }
    }

    fn resolved(kind: DeploymentKind, partial: PartialConfig) -> ResolvedConfig {
        let reference = ReferenceCatalog::embedded().unwrap().get(kind).unwrap();
        resolve(&partial, &reference).unwrap()
    }

    fn with_storage(p: PartialConfig) -> PartialConfig {
        p.with("storage", "rclone_url", "https://share.example.eu/remote.php/webdav")
            .with("storage", "rclone_user", "alice")
            .with("storage", "rclone_password", "pw")
    }

    fn builder() -> JobSpecBuilder {
        JobSpecBuilder::new(vec!["dc1".into()], None)
    }

    #[test]
    fn test_module_defaults() {
        let cfg = resolved(DeploymentKind::Module, PartialConfig::new());
        let job = builder().build(DeploymentKind::Module, &cfg, &ctx()).unwrap();

        assert_eq!(job.id, ctx().job_id);
        assert_eq!(job.namespace, "example");
        assert_eq!(job.priority, 50);
        assert_eq!(job.datacenters, vec!["dc1".to_string()]);
        assert_eq!(job.meta("owner"), Some("alice"));
        assert_eq!(job.meta("kind"), Some("module"));

        let task = job.primary_task().unwrap();
        assert_eq!(task.resources.cores, 4);
        assert_eq!(task.resources.memory_mb, 8000);
        assert!(task.resources.devices.is_empty());
        assert_eq!(task.args(), vec!["--deepaas"]);

        // no credentials: storage sidecar removed
        let group = job.primary_group().unwrap();
        assert_eq!(group.tasks.len(), 1);
        assert_eq!(group.ephemeral_disk.as_ref().unwrap().size_mb, 10000);

        let labels: Vec<&str> = group.services.iter().map(|s| s.port_label.as_str()).collect();
        assert_eq!(labels, routed_labels(DeploymentKind::Module));
        assert!(group.services[0].tags.iter().any(|t| t.contains("Host(`api-myapp.deployments.example.eu`)")));
    }

    #[test]
    fn test_numeric_strings_render_as_numbers() {
        let cfg = resolved(
            DeploymentKind::Module,
            PartialConfig::new().with("hardware", "ram", "4000"),
        );
        let job = builder().build(DeploymentKind::Module, &cfg, &ctx()).unwrap();
        assert_eq!(job.primary_task().unwrap().resources.memory_mb, 4000);
    }

    #[test]
    fn test_gpu_request_with_model() {
        let cfg = resolved(
            DeploymentKind::Module,
            PartialConfig::new()
                .with("hardware", "gpu_num", 1)
                .with("hardware", "gpu_type", "Tesla T4"),
        );
        let job = builder().build(DeploymentKind::Module, &cfg, &ctx()).unwrap();
        let device = &job.primary_task().unwrap().resources.devices[0];
        assert_eq!(device.count, 1);
        assert_eq!(device.constraints[0].r_target, "Tesla T4");
    }

    #[test]
    fn test_storage_kept_with_credentials() {
        let cfg = resolved(DeploymentKind::Module, with_storage(PartialConfig::new()));
        let job = builder().build(DeploymentKind::Module, &cfg, &ctx()).unwrap();
        let group = job.primary_group().unwrap();
        let storage = group.task(transforms::STORAGE_TASK).unwrap();
        assert_eq!(storage.env["RCLONE_CONFIG_RSHARE_USER"], "alice");
    }

    #[test]
    fn test_batch_requires_credentials() {
        let cfg = resolved(
            DeploymentKind::Batch,
            PartialConfig::new().with("general", "script", "python train.py"),
        );
        let err = builder().build(DeploymentKind::Batch, &cfg, &ctx()).unwrap_err();
        assert!(matches!(err, OrbitError::Validation(ref m) if m.contains("storage.rclone_user")));
    }

    #[test]
    fn test_batch_job_shape() {
        let cfg = resolved(
            DeploymentKind::Batch,
            with_storage(PartialConfig::new())
                .with("general", "script", "python train.py")
                .with("storage", "datasets", json!(["10.5281/zenodo.1", "10.5281/zenodo.2"])),
        );
        let mut ctx = ctx();
        ctx.domain = None;
        let job = builder().build(DeploymentKind::Batch, &cfg, &ctx).unwrap();

        assert_eq!(job.job_type, "batch");
        let group = job.primary_group().unwrap();
        assert!(group.networks.is_empty());
        assert!(group.services.is_empty());
        assert_eq!(group.restart_policy.as_ref().unwrap().attempts, 0);
        assert_eq!(
            group.tasks.iter().filter(|t| t.name.starts_with(transforms::DATASET_TASK_PREFIX)).count(),
            2
        );

        let task = job.primary_task().unwrap();
        assert!(task.config.get("ports").is_none());
        assert_eq!(task.templates[0].embedded_tmpl, "python train.py");
        assert_eq!(job.constraints[0].r_target, "compute|batch");
        assert_eq!(job.affinities[0].r_target, "batch");
    }

    #[test]
    fn test_try_me_retention() {
        let cfg = resolved(DeploymentKind::TryMe, PartialConfig::new());
        let job = builder().build(DeploymentKind::TryMe, &cfg, &ctx()).unwrap();
        assert_eq!(job.meta("retention_secs"), Some("600"));
        assert_eq!(job.job_type, "batch");
        let task = job.primary_task().unwrap();
        assert_eq!(task.config["entrypoint"], json!(["timeout", "-k", "30", "600"]));
        assert_eq!(task.config["command"], json!("deep-start"));
        assert_eq!(job.primary_group().unwrap().tasks.len(), 1);
    }

    #[test]
    fn test_snapshot_pinned_to_source_node() {
        let cfg = resolved(
            DeploymentKind::Snapshot,
            PartialConfig::new().with("general", "source_job_id", "src-1"),
        );
        let mut ctx = ctx();
        ctx.domain = None;
        let err = builder().build(DeploymentKind::Snapshot, &cfg, &ctx).unwrap_err();
        assert!(matches!(err, OrbitError::Validation(_)));

        ctx.placement = PlacementHints {
            source_job_id: Some("src-1".into()),
            alloc_id: Some("alloc-1".into()),
            node_id: Some("node-7".into()),
        };
        let job = builder().build(DeploymentKind::Snapshot, &cfg, &ctx).unwrap();
        assert!(job
            .constraints
            .iter()
            .any(|c| c.l_target == "${node.unique.id}" && c.r_target == "node-7"));
        assert_eq!(job.meta("source_job_id"), Some("src-1"));
        assert_eq!(job.meta("source_alloc_id"), Some("alloc-1"));
    }

    #[test]
    fn test_missing_domain_is_a_template_error() {
        let cfg = resolved(DeploymentKind::Module, PartialConfig::new());
        let mut ctx = ctx();
        ctx.domain = None;
        let err = builder().build(DeploymentKind::Module, &cfg, &ctx).unwrap_err();
        assert_eq!(err, OrbitError::Template("no value for placeholders: DOMAIN".into()));
    }

    #[test]
    fn test_registry_auth_for_private_image() {
        let registry = RegistryAuth {
            host: "registry.example.eu".into(),
            username: "robot".into(),
            password: "s3cret".into(),
        };
        let cfg = resolved(DeploymentKind::Module, PartialConfig::new());
        let job = JobSpecBuilder::new(vec![], Some(registry))
            .build(DeploymentKind::Module, &cfg, &ctx())
            .unwrap();
        assert_eq!(job.primary_task().unwrap().config["auth"]["password"], "s3cret");
    }
}
