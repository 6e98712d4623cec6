//! Hostname allocation and availability probing.
//!
//! The probe and the later job submission are not atomic: two requests for
//! the same hostname can both see it free.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orbit_common::{OrbitError, OrbitResult};
use reqwest::{redirect, Client, Url};

/// What answered a probe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResponse {
    /// Nothing answered (DNS failure, refused connection, timeout).
    Unreachable,
    Response {
        status: u16,
        /// Lowercased header names.
        header_names: BTreeSet<String>,
        content_type_options: Option<String>,
        content_length: Option<u64>,
    },
}

impl ProbeResponse {
    /// Whether the response is the proxy's answer for a host with no route.
    ///
    /// The signature is a 404 with exactly the headers `content-type`,
    /// `x-content-type-options`, `date` and `content-length`, `nosniff`, and
    /// the 19 byte body `404 page not found\n`.
    pub fn is_unrouted(&self) -> bool {
        match self {
            ProbeResponse::Unreachable => true,
            ProbeResponse::Response {
                status,
                header_names,
                content_type_options,
                content_length,
            } => {
                let expected: BTreeSet<String> =
                    ["content-type", "x-content-type-options", "date", "content-length"]
                        .into_iter()
                        .map(str::to_string)
                        .collect();
                *status == 404
                    && *header_names == expected
                    && content_type_options.as_deref() == Some("nosniff")
                    && *content_length == Some(19)
            }
        }
    }
}

#[async_trait]
pub trait DomainProbe: Send + Sync {
    async fn probe(&self, host: &str) -> OrbitResult<ProbeResponse>;
}

/// Probes hosts with an HTTPS GET through the public ingress.
#[derive(Debug, Clone)]
pub struct HttpDomainProbe {
    client: Client,
}

impl HttpDomainProbe {
    pub fn new(timeout: Duration) -> OrbitResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            // unrouted hosts are served with the proxy's default certificate
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| OrbitError::Upstream(format!("failed to build probe client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DomainProbe for HttpDomainProbe {
    async fn probe(&self, host: &str) -> OrbitResult<ProbeResponse> {
        let url = Url::parse(&format!("https://{host}"))
            .map_err(|e| OrbitError::validation(format!("invalid hostname '{host}': {e}")))?;

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(host, error = %e, "probe got no answer");
                return Ok(ProbeResponse::Unreachable);
            }
        };

        let headers = response.headers();
        Ok(ProbeResponse::Response {
            status: response.status().as_u16(),
            header_names: headers.keys().map(|k| k.as_str().to_ascii_lowercase()).collect(),
            content_type_options: headers
                .get("x-content-type-options")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            content_length: response.content_length(),
        })
    }
}

/// Derives hostnames for routable deployments and checks they are unused.
#[derive(Clone)]
pub struct DomainAllocator {
    probe: Arc<dyn DomainProbe>,
    reserved: Vec<String>,
}

impl DomainAllocator {
    pub fn new(probe: Arc<dyn DomainProbe>, reserved: Vec<String>) -> Self {
        Self { probe, reserved }
    }

    /// Hostname for a deployment.
    ///
    /// A hint containing a dot is taken as a full hostname; a bare label is
    /// placed under `base_domain`; no hint falls back to the job id.
    pub fn allocate(&self, hint: Option<&str>, base_domain: &str, job_id: &str) -> OrbitResult<String> {
        let hint = hint.map(str::trim).filter(|h| !h.is_empty());
        let domain = match hint {
            None => format!("{job_id}.{base_domain}"),
            Some(h) if h.contains('.') => host_of(h)?,
            Some(label) => {
                validate_label(label)?;
                format!("{}.{base_domain}", label.to_ascii_lowercase())
            }
        };

        let first = domain.split('.').next().unwrap_or_default();
        if self.reserved.iter().any(|r| r.eq_ignore_ascii_case(first)) {
            return Err(OrbitError::validation(format!(
                "subdomain '{first}' is reserved"
            )));
        }
        Ok(domain)
    }

    /// Fails with `DomainConflict` when something already answers on `host`.
    pub async fn check_domain(&self, host: &str) -> OrbitResult<()> {
        let response = self.probe.probe(host).await?;
        if response.is_unrouted() {
            Ok(())
        } else {
            tracing::info!(host, ?response, "hostname already in use");
            Err(OrbitError::DomainConflict(host.to_string()))
        }
    }

    /// Check every routed host of a deployment, `{label}-{domain}`.
    pub async fn ensure_available(&self, domain: &str, labels: &[&str]) -> OrbitResult<()> {
        for label in labels {
            self.check_domain(&format!("{label}-{domain}")).await?;
        }
        Ok(())
    }
}

/// Host component of a full hostname, which may carry a scheme or path.
fn host_of(hint: &str) -> OrbitResult<String> {
    let with_scheme = if hint.contains("://") {
        hint.to_string()
    } else {
        format!("http://{hint}")
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| OrbitError::validation(format!("invalid hostname '{hint}': {e}")))?;
    url.host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| OrbitError::validation(format!("invalid hostname '{hint}'")))
}

fn validate_label(label: &str) -> OrbitResult<()> {
    let valid = label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(OrbitError::validation(format!(
            "invalid hostname '{label}': use letters, digits and inner hyphens only"
        )))
    }
}
