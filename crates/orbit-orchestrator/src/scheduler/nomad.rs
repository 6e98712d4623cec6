//! HTTP client for the Nomad API.

use std::time::Duration;

use async_trait::async_trait;
use orbit_common::{OrbitError, OrbitResult};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::types::{Allocation, Evaluation, Job, JobStub, NodeRecord, RegisterResponse};
use super::Scheduler;

#[derive(Debug, Clone)]
pub struct NomadClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl NomadClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> OrbitResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .build()
            .map_err(|e| OrbitError::scheduler(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let req = self.client.request(method, url);
        match &self.token {
            Some(t) => req.header("X-Nomad-Token", t),
            None => req,
        }
    }

    /// GET returning `None` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> OrbitResult<Option<T>> {
        let response = self
            .request(Method::GET, path)
            .query(query)
            .send()
            .await
            .map_err(|e| OrbitError::scheduler(format!("GET {path}: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json()
                .await
                .map(Some)
                .map_err(|e| OrbitError::scheduler(format!("GET {path}: invalid response: {e}"))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(OrbitError::scheduler(format!(
                    "GET {path} failed ({status}): {}",
                    body.trim()
                )))
            }
        }
    }
}

#[async_trait]
impl Scheduler for NomadClient {
    async fn register(&self, job: &Job) -> OrbitResult<RegisterResponse> {
        let response = self
            .request(Method::PUT, "/v1/jobs")
            .query(&[("namespace", job.namespace.as_str())])
            .json(&json!({ "Job": job }))
            .send()
            .await
            .map_err(|e| OrbitError::scheduler(format!("job registration failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrbitError::scheduler(format!(
                "job registration rejected ({status}): {}",
                body.trim()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OrbitError::scheduler(format!("invalid registration response: {e}")))
    }

    async fn job(&self, job_id: &str, namespace: &str) -> OrbitResult<Option<Job>> {
        self.get_json(&format!("/v1/job/{job_id}"), &[("namespace", namespace)])
            .await
    }

    async fn jobs(&self, namespace: &str) -> OrbitResult<Vec<JobStub>> {
        let jobs = self
            .get_json("/v1/jobs", &[("namespace", namespace), ("meta", "true")])
            .await?;
        Ok(jobs.unwrap_or_default())
    }

    async fn allocations(&self, job_id: &str, namespace: &str) -> OrbitResult<Vec<Allocation>> {
        let allocs = self
            .get_json(
                &format!("/v1/job/{job_id}/allocations"),
                &[("namespace", namespace)],
            )
            .await?;
        Ok(allocs.unwrap_or_default())
    }

    async fn allocation(&self, alloc_id: &str, namespace: &str) -> OrbitResult<Option<Allocation>> {
        self.get_json(
            &format!("/v1/allocation/{alloc_id}"),
            &[("namespace", namespace)],
        )
        .await
    }

    async fn evaluations(&self, job_id: &str, namespace: &str) -> OrbitResult<Vec<Evaluation>> {
        let evals = self
            .get_json(
                &format!("/v1/job/{job_id}/evaluations"),
                &[("namespace", namespace)],
            )
            .await?;
        Ok(evals.unwrap_or_default())
    }

    async fn deregister(&self, job_id: &str, namespace: &str, purge: bool) -> OrbitResult<()> {
        let purge = if purge { "true" } else { "false" };
        let response = self
            .request(Method::DELETE, &format!("/v1/job/{job_id}"))
            .query(&[("namespace", namespace), ("purge", purge)])
            .send()
            .await
            .map_err(|e| OrbitError::scheduler(format!("job deregistration failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(OrbitError::NotFound(format!("job '{job_id}'"))),
            status if status.is_success() => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(OrbitError::scheduler(format!(
                    "job deregistration rejected ({status}): {}",
                    body.trim()
                )))
            }
        }
    }

    async fn nodes(&self) -> OrbitResult<Vec<NodeRecord>> {
        let nodes = self
            .get_json("/v1/nodes", &[("resources", "true")])
            .await?;
        Ok(nodes.unwrap_or_default())
    }
}
