mod args;
mod error;
mod handlers;
mod metrics;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use clap::Parser;

use orbit_common::auth::{auth_middleware, parse_auth_from_env};
use orbit_meta::{EtcdMetaStore, MemoryMetaStore, MetaStore};
use orbit_orchestrator::{
    HttpDomainProbe, MemoryScheduler, NomadClient, Orchestrator, RegistryAuth, Scheduler, Settings,
};

use crate::args::{Args, CacheBackend, SchedulerBackend};
use crate::handlers::{
    cluster_stats, create_deployment, delete_deployment, get_deployment, gpu_models, healthz,
    kind_config, list_deployments, whoami,
};
use crate::metrics::{metrics_handler, track_requests};
use crate::state::AppState;

fn router(st: AppState) -> Router {
    let authed = Router::new()
        .route("/whoami", get(whoami))
        .route("/deployments/:kind", get(list_deployments).post(create_deployment))
        .route(
            "/deployments/:kind/:job_id",
            get(get_deployment).delete(delete_deployment),
        )
        .route("/catalog/:kind/config", get(kind_config))
        .route("/cluster/gpu-models", get(gpu_models))
        .route("/cluster/stats", get(cluster_stats))
        .layer(middleware::from_fn_with_state(st.clone(), auth_middleware::<AppState>))
        .with_state(st.clone());

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .nest("/v1", authed)
        .layer(middleware::from_fn_with_state(st.clone(), track_requests))
        .with_state(st)
}

fn registry(args: &Args) -> Option<RegistryAuth> {
    match (&args.registry_host, &args.registry_user, &args.registry_password) {
        (Some(host), Some(username), Some(password)) => Some(RegistryAuth {
            host: host.clone(),
            username: username.clone(),
            password: password.clone(),
        }),
        (Some(host), _, _) => {
            tracing::warn!(host = %host, "registry credentials incomplete, images are pulled anonymously");
            None
        }
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _otel_guard = orbit_common::telemetry::init_tracing(
        "orbit-api",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
        &args.log_format,
    );

    let settings = Settings::load(args.settings.as_deref())?;

    let scheduler: Arc<dyn Scheduler> = match args.scheduler {
        SchedulerBackend::Nomad => Arc::new(
            NomadClient::new(
                &args.nomad_addr,
                args.nomad_token.clone(),
                Duration::from_secs(args.scheduler_timeout),
            )
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to build scheduler client");
                std::process::exit(1);
            }),
        ),
        SchedulerBackend::Memory => {
            tracing::warn!("using the in-memory scheduler, jobs will not run");
            Arc::new(MemoryScheduler::new())
        }
    };

    let cache: Arc<dyn MetaStore> = match args.cache_backend {
        CacheBackend::Memory => Arc::new(MemoryMetaStore::new()),
        CacheBackend::Etcd => {
            Arc::new(EtcdMetaStore::connect(std::slice::from_ref(&args.etcd_endpoint)).await?)
        }
    };

    let probe = HttpDomainProbe::new(Duration::from_secs(args.probe_timeout)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to build probe client");
        std::process::exit(1);
    });

    let orchestrator = Orchestrator::new(scheduler, settings, Arc::new(probe), cache)?
        .with_registry(registry(&args))
        .with_cache_ttl(Duration::from_secs(args.cache_ttl));

    let st = AppState {
        orchestrator: Arc::new(orchestrator),
        auth: parse_auth_from_env(),
        metrics: Arc::new(metrics::Metrics::default()),
    };

    tracing::info!(
        addr = %args.listen_addr,
        scheduler = ?args.scheduler,
        organizations = st.orchestrator.settings().organizations.len(),
        "orbit-api starting"
    );

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    axum::serve(listener, router(st)).await?;
    Ok(())
}
