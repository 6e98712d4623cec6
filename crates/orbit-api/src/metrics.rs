use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_inflight: AtomicU64,
    pub status_2xx: AtomicU64,
    pub status_4xx: AtomicU64,
    pub status_5xx: AtomicU64,
    pub deployments_created: AtomicU64,
    pub submission_failures: AtomicU64,
    pub quota_rejections: AtomicU64,
    pub domain_conflicts: AtomicU64,
    pub deployments_deleted: AtomicU64,
}

fn counter(body: &mut String, name: &str, kind: &str, help: &str, value: &AtomicU64) {
    body.push_str(&format!(
        "# HELP orbit_{name} {help}\n# TYPE orbit_{name} {kind}\norbit_{name} {}\n",
        value.load(Ordering::Relaxed),
    ));
}

pub fn render_metrics(m: &Metrics) -> String {
    let mut body = String::new();
    counter(&mut body, "requests_total", "counter", "Total requests handled.", &m.requests_total);
    counter(&mut body, "requests_inflight", "gauge", "Currently in-flight requests.", &m.requests_inflight);
    counter(&mut body, "responses_2xx", "counter", "Total 2xx responses.", &m.status_2xx);
    counter(&mut body, "responses_4xx", "counter", "Total 4xx responses.", &m.status_4xx);
    counter(&mut body, "responses_5xx", "counter", "Total 5xx responses.", &m.status_5xx);
    counter(
        &mut body,
        "deployments_created_total",
        "counter",
        "Deployments accepted by the scheduler.",
        &m.deployments_created,
    );
    counter(
        &mut body,
        "submission_failures_total",
        "counter",
        "Jobs rejected by the scheduler.",
        &m.submission_failures,
    );
    counter(
        &mut body,
        "quota_rejections_total",
        "counter",
        "Creations refused by a job-wise or tenant-wise quota.",
        &m.quota_rejections,
    );
    counter(
        &mut body,
        "domain_conflicts_total",
        "counter",
        "Creations refused because the hostname is in use.",
        &m.domain_conflicts,
    );
    counter(
        &mut body,
        "deployments_deleted_total",
        "counter",
        "Deployments stopped by their owners.",
        &m.deployments_deleted,
    );
    body
}

pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    let body = render_metrics(&st.metrics);
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

pub async fn track_requests(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible> {
    st.metrics.requests_inflight.fetch_add(1, Ordering::Relaxed);
    let resp = next.run(req).await;
    st.metrics.requests_inflight.fetch_sub(1, Ordering::Relaxed);
    st.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let status = resp.status().as_u16();
    if status >= 500 {
        st.metrics.status_5xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 400 {
        st.metrics.status_4xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 200 {
        st.metrics.status_2xx.fetch_add(1, Ordering::Relaxed);
    }

    Ok(resp)
}
