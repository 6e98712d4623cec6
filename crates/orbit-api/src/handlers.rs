use std::sync::atomic::Ordering;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use orbit_common::auth::AuthContext;
use orbit_common::{CreateOutcome, DeploymentKind, OrbitError, PartialConfig};
use orbit_orchestrator::DeploymentRequest;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct VoQuery {
    /// Organization the request acts in.
    pub vo: Option<String>,
}

/// The organization named by `?vo=`, or the caller's only one.
fn organization(ctx: &AuthContext, q: &VoQuery) -> Result<String, OrbitError> {
    if let Some(vo) = q.vo.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(vo.to_string());
    }
    match ctx.organizations.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(OrbitError::validation("the 'vo' query parameter is required")),
    }
}

fn kind(raw: &str) -> Result<DeploymentKind, OrbitError> {
    raw.parse()
        .map_err(|_| OrbitError::NotFound(format!("deployment kind '{raw}'")))
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn whoami(Extension(ctx): Extension<AuthContext>) -> impl IntoResponse {
    Json(json!({
        "tenant_id": ctx.tenant_id,
        "organizations": ctx.organizations,
    }))
}

pub async fn list_deployments(
    State(st): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(raw_kind): Path<String>,
    Query(q): Query<VoQuery>,
) -> ApiResult<Response> {
    let kind = kind(&raw_kind)?;
    let org = organization(&ctx, &q)?;
    let deployments = st.orchestrator.list(&ctx, &org, kind).await?;
    Ok(Json(deployments).into_response())
}

pub async fn get_deployment(
    State(st): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((raw_kind, job_id)): Path<(String, String)>,
    Query(q): Query<VoQuery>,
) -> ApiResult<Response> {
    let kind = kind(&raw_kind)?;
    let org = organization(&ctx, &q)?;
    let deployment = st.orchestrator.get(&ctx, &org, kind, &job_id).await?;
    Ok(Json(deployment).into_response())
}

pub async fn create_deployment(
    State(st): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(raw_kind): Path<String>,
    Query(q): Query<VoQuery>,
    Json(config): Json<PartialConfig>,
) -> ApiResult<Response> {
    let kind = kind(&raw_kind)?;
    let org = organization(&ctx, &q)?;
    let req = DeploymentRequest {
        organization: org,
        kind,
        config,
    };

    let outcome = match st.orchestrator.create(&ctx, req).await {
        Ok(o) => o,
        Err(e) => {
            match &e {
                OrbitError::Quota { .. } => {
                    st.metrics.quota_rejections.fetch_add(1, Ordering::Relaxed);
                }
                OrbitError::DomainConflict(_) => {
                    st.metrics.domain_conflicts.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
            return Err(e.into());
        }
    };

    let status = match &outcome {
        CreateOutcome::Success { .. } => {
            st.metrics.deployments_created.fetch_add(1, Ordering::Relaxed);
            StatusCode::CREATED
        }
        CreateOutcome::Fail { .. } => {
            st.metrics.submission_failures.fetch_add(1, Ordering::Relaxed);
            StatusCode::OK
        }
    };
    Ok((status, Json(outcome)).into_response())
}

pub async fn delete_deployment(
    State(st): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((raw_kind, job_id)): Path<(String, String)>,
    Query(q): Query<VoQuery>,
) -> ApiResult<Response> {
    let kind = kind(&raw_kind)?;
    let org = organization(&ctx, &q)?;
    st.orchestrator.delete(&ctx, &org, kind, &job_id).await?;
    st.metrics.deployments_deleted.fetch_add(1, Ordering::Relaxed);
    Ok(Json(json!({"status": "success"})).into_response())
}

pub async fn kind_config(
    State(st): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(raw_kind): Path<String>,
    Query(q): Query<VoQuery>,
) -> ApiResult<Response> {
    let kind = kind(&raw_kind)?;
    let org = organization(&ctx, &q)?;
    let reference = st.orchestrator.reference_config(&ctx, &org, kind).await?;
    Ok(Json(reference).into_response())
}

pub async fn gpu_models(State(st): State<AppState>) -> ApiResult<Response> {
    Ok(Json(st.orchestrator.gpu_models().await?).into_response())
}

pub async fn cluster_stats(State(st): State<AppState>) -> ApiResult<Response> {
    Ok(Json(st.orchestrator.cluster_stats().await?).into_response())
}
