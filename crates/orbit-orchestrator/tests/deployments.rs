use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use orbit_common::auth::AuthContext;
use orbit_common::{
    CreateOutcome, DeploymentKind, DeploymentStatus, OrbitError, OrbitResult, PartialConfig,
};
use orbit_meta::MemoryMetaStore;
use orbit_orchestrator::scheduler::types::AllocMetric;
use orbit_orchestrator::{
    DeploymentRequest, DomainProbe, MemoryScheduler, Orchestrator, ProbeResponse, Scheduler,
    Settings,
};
use tokio::sync::Barrier;

const STANDARD: &str = "vo.example.eu";
const RESTRICTED: &str = "training.example.eu";

/// Answers 200 for hosts marked as routed, nothing for the rest.
#[derive(Default)]
struct RoutingProbe {
    routed: Mutex<BTreeSet<String>>,
    calls: AtomicUsize,
}

impl RoutingProbe {
    fn route(&self, host: &str) {
        self.routed.lock().unwrap().insert(host.to_string());
    }
}

#[async_trait]
impl DomainProbe for RoutingProbe {
    async fn probe(&self, host: &str) -> OrbitResult<ProbeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.routed.lock().unwrap().contains(host) {
            Ok(ProbeResponse::Response {
                status: 200,
                header_names: BTreeSet::new(),
                content_type_options: None,
                content_length: None,
            })
        } else {
            Ok(ProbeResponse::Unreachable)
        }
    }
}

/// Holds every probe until two requests are probing at the same time.
struct LockstepProbe(Barrier);

#[async_trait]
impl DomainProbe for LockstepProbe {
    async fn probe(&self, _host: &str) -> OrbitResult<ProbeResponse> {
        self.0.wait().await;
        Ok(ProbeResponse::Unreachable)
    }
}

struct Harness {
    scheduler: Arc<MemoryScheduler>,
    probe: Arc<RoutingProbe>,
    orch: Orchestrator,
}

fn orchestrator(scheduler: &Arc<MemoryScheduler>, probe: Arc<dyn DomainProbe>) -> Orchestrator {
    let dyn_scheduler: Arc<dyn Scheduler> = scheduler.clone();
    Orchestrator::new(
        dyn_scheduler,
        Settings::embedded().unwrap(),
        probe,
        Arc::new(MemoryMetaStore::new()),
    )
    .unwrap()
}

fn harness() -> Harness {
    let scheduler = Arc::new(MemoryScheduler::new());
    let probe = Arc::new(RoutingProbe::default());
    let orch = orchestrator(&scheduler, probe.clone());
    Harness {
        scheduler,
        probe,
        orch,
    }
}

fn alice() -> AuthContext {
    AuthContext::new("alice", vec![STANDARD.to_string(), RESTRICTED.to_string()])
}

fn bob() -> AuthContext {
    AuthContext::new("bob", vec![STANDARD.to_string()])
}

fn request(org: &str, kind: DeploymentKind, config: PartialConfig) -> DeploymentRequest {
    DeploymentRequest {
        organization: org.to_string(),
        kind,
        config,
    }
}

async fn create_ok(h: &Harness, ctx: &AuthContext, req: DeploymentRequest) -> String {
    match h.orch.create(ctx, req).await.unwrap() {
        CreateOutcome::Success { job_id } => job_id,
        CreateOutcome::Fail { error_msg } => panic!("create failed: {error_msg}"),
    }
}

#[tokio::test]
async fn test_module_lifecycle() {
    let h = harness();
    let ctx = alice();
    let job_id = create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, PartialConfig::new())).await;

    let d = h.orch.get(&ctx, STANDARD, DeploymentKind::Module, &job_id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Queued);
    assert_eq!(d.owner, "alice");
    assert_eq!(d.namespace, "example");
    assert_eq!(
        d.endpoints["api"],
        format!("https://api-{job_id}.deployments.example.eu")
    );
    assert_eq!(d.main_endpoint.as_deref(), Some("api"));
    assert_eq!((d.resources.cpu_num, d.resources.memory_mb), (4, 8000));

    let alloc_id = h.scheduler.place(&job_id, "example", "pending").await.unwrap();
    let d = h.orch.get(&ctx, STANDARD, DeploymentKind::Module, &job_id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Starting);
    assert_eq!(d.alloc_id.as_deref(), Some(alloc_id.as_str()));

    h.scheduler.set_client_status(&alloc_id, "running", None).await.unwrap();
    let listed = h.orch.list(&ctx, STANDARD, DeploymentKind::Module).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, DeploymentStatus::Running);
    assert_eq!(listed[0].resources.disk_mb, 10000);

    h.orch.delete(&ctx, STANDARD, DeploymentKind::Module, &job_id).await.unwrap();
    // stopped but not drained yet
    let record = h.scheduler.job(&job_id, "example").await.unwrap().unwrap();
    assert!(record.stop);
    assert_eq!(record.status.as_deref(), Some("running"));
    assert!(matches!(
        h.orch.get(&ctx, STANDARD, DeploymentKind::Module, &job_id).await,
        Err(OrbitError::NotFound(_))
    ));
    assert!(matches!(
        h.orch.delete(&ctx, STANDARD, DeploymentKind::Module, &job_id).await,
        Err(OrbitError::NotFound(_))
    ));
    assert!(h.orch.list(&ctx, STANDARD, DeploymentKind::Module).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_out_of_range_request_never_reaches_scheduler() {
    let h = harness();
    let config = PartialConfig::new().with("hardware", "cpu_num", 99);
    let err = h
        .orch
        .create(&alice(), request(STANDARD, DeploymentKind::Module, config))
        .await
        .unwrap_err();

    assert!(matches!(err, OrbitError::Quota { ref dimension, .. } if dimension == "cpu_num"));
    assert_eq!(h.scheduler.register_calls(), 0);
    assert_eq!(h.probe.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_keys_rejected() {
    let h = harness();
    let config = PartialConfig::new().with("hardware", "cpus", 2);
    let err = h
        .orch
        .create(&alice(), request(STANDARD, DeploymentKind::Module, config))
        .await
        .unwrap_err();
    assert_eq!(err, OrbitError::validation("unknown configuration keys: hardware.cpus"));
}

#[tokio::test]
async fn test_restricted_class_limits() {
    let h = harness();
    let ctx = alice();

    let config = PartialConfig::new().with("hardware", "cpu_num", 8);
    let err = h
        .orch
        .create(&ctx, request(RESTRICTED, DeploymentKind::Module, config))
        .await
        .unwrap_err();
    assert_eq!(err, OrbitError::quota("cpu_num", "8 is above the maximum 4"));

    let config = PartialConfig::new().with("hardware", "gpu_num", 1);
    let err = h
        .orch
        .create(&ctx, request(RESTRICTED, DeploymentKind::Module, config))
        .await
        .unwrap_err();
    assert!(matches!(err, OrbitError::Quota { ref dimension, .. } if dimension == "gpu_num"));

    assert_eq!(h.scheduler.register_calls(), 0);

    let job_id = create_ok(&h, &ctx, request(RESTRICTED, DeploymentKind::Module, PartialConfig::new())).await;
    let job = h.scheduler.job(&job_id, "training").await.unwrap().unwrap();
    assert_eq!(job.priority, 25);
    assert_eq!(job.primary_task().unwrap().resources.cores, 2);
}

#[tokio::test]
async fn test_tenant_wise_ceiling() {
    let h = harness();
    let ctx = alice();
    for _ in 0..2 {
        create_ok(&h, &ctx, request(RESTRICTED, DeploymentKind::Module, PartialConfig::new())).await;
    }

    let err = h
        .orch
        .create(&ctx, request(RESTRICTED, DeploymentKind::Module, PartialConfig::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, OrbitError::Quota { ref dimension, .. } if dimension == "cpu_num"));
    assert_eq!(h.scheduler.register_calls(), 2);

    // failed deployments no longer hold resources
    let first = h.orch.list(&ctx, RESTRICTED, DeploymentKind::Module).await.unwrap()[0].job_id.clone();
    let alloc = h.scheduler.place(&first, "training", "pending").await.unwrap();
    h.scheduler.set_client_status(&alloc, "failed", Some("OOM killed")).await.unwrap();
    create_ok(&h, &ctx, request(RESTRICTED, DeploymentKind::Module, PartialConfig::new())).await;
}

#[tokio::test]
async fn test_concurrent_creates_see_stale_usage() {
    let scheduler = Arc::new(MemoryScheduler::new());
    let orch = orchestrator(&scheduler, Arc::new(LockstepProbe(Barrier::new(2))));
    let ctx = alice();
    let big = || {
        request(
            RESTRICTED,
            DeploymentKind::Module,
            PartialConfig::new().with("hardware", "cpu_num", 3),
        )
    };

    // both check the ceiling before either is submitted
    let (a, b) = tokio::join!(orch.create(&ctx, big()), orch.create(&ctx, big()));
    assert!(a.unwrap().job_id().is_some());
    assert!(b.unwrap().job_id().is_some());
    assert_eq!(scheduler.register_calls(), 2);

    let sequential = orchestrator(&scheduler, Arc::new(RoutingProbe::default()));
    let err = sequential.create(&ctx, big()).await.unwrap_err();
    assert!(matches!(err, OrbitError::Quota { .. }));
}

#[tokio::test]
async fn test_gpu_request_shapes() {
    let h = harness();
    let ctx = alice();

    let none = create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, PartialConfig::new())).await;
    let job = h.scheduler.job(&none, "example").await.unwrap().unwrap();
    assert!(job.primary_task().unwrap().resources.devices.is_empty());

    let config = PartialConfig::new().with("hardware", "gpu_num", 1);
    let any = create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, config)).await;
    let job = h.scheduler.job(&any, "example").await.unwrap().unwrap();
    let devices = &job.primary_task().unwrap().resources.devices;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].count, 1);
    assert!(devices[0].constraints.is_empty());

    let config = PartialConfig::new()
        .with("hardware", "gpu_num", 1)
        .with("hardware", "gpu_type", "Tesla T4");
    let model = create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, config)).await;
    h.scheduler.place(&model, "example", "running").await.unwrap();
    let d = h.orch.get(&ctx, STANDARD, DeploymentKind::Module, &model).await.unwrap();
    assert_eq!(d.resources.gpu_num, 1);
    assert_eq!(d.resources.gpu_models, vec!["Tesla T4".to_string()]);
}

#[tokio::test]
async fn test_foreign_deployments_read_as_missing() {
    let h = harness();
    let job_id = create_ok(&h, &alice(), request(STANDARD, DeploymentKind::Module, PartialConfig::new())).await;

    let err = h.orch.get(&bob(), STANDARD, DeploymentKind::Module, &job_id).await.unwrap_err();
    assert_eq!(err, OrbitError::not_owner(&job_id));
    assert_eq!(err.to_string(), OrbitError::deployment_not_found(&job_id).to_string());
    let err = h.orch.delete(&bob(), STANDARD, DeploymentKind::Module, &job_id).await.unwrap_err();
    assert_eq!(err, OrbitError::not_owner(&job_id));

    assert!(h.orch.list(&bob(), STANDARD, DeploymentKind::Module).await.unwrap().is_empty());
    assert!(h.orch.get(&alice(), STANDARD, DeploymentKind::Module, &job_id).await.is_ok());
}

#[tokio::test]
async fn test_organization_membership() {
    let h = harness();
    let err = h
        .orch
        .create(&bob(), request(RESTRICTED, DeploymentKind::Module, PartialConfig::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, OrbitError::Ownership(_)));

    let err = h
        .orch
        .list(&bob(), "nowhere.example.eu", DeploymentKind::Module)
        .await
        .unwrap_err();
    assert!(matches!(err, OrbitError::Validation(_)));
}

#[tokio::test]
async fn test_list_is_scoped_to_kind() {
    let h = harness();
    let ctx = alice();
    create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, PartialConfig::new())).await;
    let tool = create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Tool, PartialConfig::new())).await;

    let tools = h.orch.list(&ctx, STANDARD, DeploymentKind::Tool).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].job_id, tool);
    assert_eq!(tools[0].kind, DeploymentKind::Tool);
    assert!(matches!(
        h.orch.get(&ctx, STANDARD, DeploymentKind::Module, &tool).await,
        Err(OrbitError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_placement_failure_is_reported() {
    let h = harness();
    let ctx = alice();
    let job_id = create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, PartialConfig::new())).await;
    h.scheduler
        .fail_placement(
            &job_id,
            "example",
            AllocMetric {
                nodes_evaluated: 2,
                nodes_exhausted: 2,
                dimension_exhausted: BTreeMap::from([("memory".to_string(), 2)]),
                ..AllocMetric::default()
            },
        )
        .await
        .unwrap();

    let d = h.orch.get(&ctx, STANDARD, DeploymentKind::Module, &job_id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Error);
    assert!(d.error_msg.unwrap().contains("memory (2)"));
}

#[tokio::test]
async fn test_container_failure_message() {
    let h = harness();
    let ctx = alice();
    let job_id = create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, PartialConfig::new())).await;
    let alloc = h.scheduler.place(&job_id, "example", "pending").await.unwrap();
    h.scheduler
        .set_client_status(&alloc, "failed", Some("Docker container exited with non-zero exit code: 1"))
        .await
        .unwrap();

    let d = h.orch.get(&ctx, STANDARD, DeploymentKind::Module, &job_id).await.unwrap();
    assert_eq!(d.status, DeploymentStatus::Failed);
    assert!(d.error_msg.unwrap().contains("Contact the module owner"));
}

#[tokio::test]
async fn test_hostname_in_use_is_rejected() {
    let h = harness();
    let ctx = alice();
    let config = || PartialConfig::new().with("general", "hostname", "demo");

    create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, config())).await;
    h.probe.route("ide-demo.deployments.example.eu");

    let err = h
        .orch
        .create(&ctx, request(STANDARD, DeploymentKind::Module, config()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        OrbitError::DomainConflict("ide-demo.deployments.example.eu".to_string())
    );
    assert_eq!(h.scheduler.register_calls(), 1);
}

#[tokio::test]
async fn test_hostname_race_window() {
    let h = harness();
    let ctx = alice();
    let config = || PartialConfig::new().with("general", "hostname", "demo");

    // nothing routes the first job before the second probes
    create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, config())).await;
    create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, config())).await;
    assert_eq!(h.scheduler.register_calls(), 2);
}

#[tokio::test]
async fn test_reserved_hostname_rejected() {
    let h = harness();
    let config = PartialConfig::new().with("general", "hostname", "www");
    let err = h
        .orch
        .create(&alice(), request(STANDARD, DeploymentKind::Module, config))
        .await
        .unwrap_err();
    assert!(matches!(err, OrbitError::Validation(_)));
}

#[tokio::test]
async fn test_scheduler_rejection_is_a_fail_outcome() {
    let h = harness();
    h.scheduler.reject_next_register("invalid job: bad driver").await;
    let outcome = h
        .orch
        .create(&alice(), request(STANDARD, DeploymentKind::Module, PartialConfig::new()))
        .await
        .unwrap();
    match outcome {
        CreateOutcome::Fail { error_msg } => assert!(error_msg.contains("bad driver")),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_snapshot_follows_source_node() {
    let h = harness();
    let ctx = alice();
    let source = create_ok(&h, &ctx, request(STANDARD, DeploymentKind::Module, PartialConfig::new())).await;
    let snapshot = || {
        request(
            STANDARD,
            DeploymentKind::Snapshot,
            PartialConfig::new().with("general", "source_job_id", source.as_str()),
        )
    };

    let err = h.orch.create(&ctx, snapshot()).await.unwrap_err();
    assert!(matches!(err, OrbitError::Validation(_)));

    let err = h.orch.create(&bob(), snapshot()).await.unwrap_err();
    assert_eq!(err, OrbitError::not_owner(&source));

    let alloc = h.scheduler.place(&source, "example", "running").await.unwrap();
    let job_id = create_ok(&h, &ctx, snapshot()).await;
    let job = h.scheduler.job(&job_id, "example").await.unwrap().unwrap();
    assert_eq!(job.meta("source_alloc_id"), Some(alloc.as_str()));
    assert!(job
        .constraints
        .iter()
        .any(|c| c.l_target == "${node.unique.id}" && c.r_target == "node-local"));
}

#[tokio::test]
async fn test_try_me_is_killed_at_deadline() {
    let h = harness();
    let job_id = create_ok(&h, &alice(), request(STANDARD, DeploymentKind::TryMe, PartialConfig::new())).await;
    let job = h.scheduler.job(&job_id, "example").await.unwrap().unwrap();
    assert_eq!(job.meta("retention_secs"), Some("600"));
    assert_eq!(job.job_type, "batch");
    let entrypoint = job.primary_task().unwrap().config["entrypoint"].clone();
    assert_eq!(entrypoint, serde_json::json!(["timeout", "-k", "30", "600"]));
    assert_eq!(h.probe.calls.load(Ordering::SeqCst), 1);
}
