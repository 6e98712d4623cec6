use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tokio::sync::Mutex;

// ── AuthContext ──────────────────────────────────────────────────────

/// Identity of the caller, as established by the token table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Immutable tenant identifier, embedded as owner in every job.
    pub tenant_id: String,
    /// Organizations the tenant belongs to.
    pub organizations: Vec<String>,
    /// Set when auth is disabled: member of every organization.
    pub unrestricted: bool,
}

impl AuthContext {
    pub fn new(tenant_id: impl Into<String>, organizations: Vec<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            organizations,
            unrestricted: false,
        }
    }

    pub fn is_member(&self, organization: &str) -> bool {
        self.unrestricted || self.organizations.iter().any(|o| o == organization)
    }
}

// ── AuthConfig ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub tenant_id: String,
    pub organizations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub tokens: Arc<HashMap<String, TokenEntry>>,
    pub rate_limits: Arc<Mutex<HashMap<String, RateWindow>>>,
    pub limit_per_minute: u64,
}

#[derive(Debug, Clone)]
pub struct RateWindow {
    pub window_start: Instant,
    pub count: u64,
}

impl AuthConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tokens: Arc::new(HashMap::new()),
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
            limit_per_minute: 0,
        }
    }
}

// ── Environment parsing ─────────────────────────────────────────────

/// Parse one `token=tenant@org1|org2` entry.
fn parse_token_entry(entry: &str) -> Option<(String, TokenEntry)> {
    let (token, identity) = entry.split_once('=')?;
    let (tenant, orgs) = identity.split_once('@').unwrap_or((identity, ""));
    let token = token.trim();
    let tenant = tenant.trim();
    if token.is_empty() || tenant.is_empty() {
        return None;
    }
    let organizations = orgs
        .split('|')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();
    Some((
        token.to_string(),
        TokenEntry {
            tenant_id: tenant.to_string(),
            organizations,
        },
    ))
}

pub fn parse_auth_tokens(raw: &str) -> HashMap<String, TokenEntry> {
    let mut tokens = HashMap::new();
    for entry in raw.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_token_entry(trimmed) {
            Some((token, identity)) => {
                tokens.insert(token, identity);
            }
            None => {
                tracing::warn!("invalid ORBIT_AUTH_TOKENS entry, expected token=tenant@org1|org2");
            }
        }
    }
    tokens
}

pub fn parse_auth_from_env() -> AuthConfig {
    let tokens_raw = std::env::var("ORBIT_AUTH_TOKENS").ok();
    let enabled = tokens_raw.is_some();
    let tokens = tokens_raw
        .as_deref()
        .map(parse_auth_tokens)
        .unwrap_or_default();

    let limit_per_minute = std::env::var("ORBIT_AUTH_RATE_LIMIT_PER_MINUTE")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(120);

    if !enabled {
        tracing::warn!("auth disabled: ORBIT_AUTH_TOKENS not set");
    }

    AuthConfig {
        enabled,
        tokens: Arc::new(tokens),
        rate_limits: Arc::new(Mutex::new(HashMap::new())),
        limit_per_minute,
    }
}

// ── Middleware ───────────────────────────────────────────────────────
// Generic over any state type S that implements AsRef<AuthConfig>.

pub async fn auth_middleware<S>(
    State(state): State<S>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible>
where
    S: AsRef<AuthConfig> + Clone + Send + Sync + 'static,
{
    let auth = state.as_ref();

    if !auth.enabled {
        let ctx = AuthContext {
            tenant_id: "anonymous".into(),
            organizations: Vec::new(),
            unrestricted: true,
        };
        req.extensions_mut().insert(ctx);
        return Ok(next.run(req).await);
    }

    let Some(token) = extract_token(&req) else {
        return Ok(unauthorized("missing token"));
    };

    let Some(identity) = auth.tokens.get(&token).cloned() else {
        return Ok(unauthorized("invalid token"));
    };

    if auth.limit_per_minute > 0 {
        let mut guard = auth.rate_limits.lock().await;
        let entry = guard
            .entry(identity.tenant_id.clone())
            .or_insert(RateWindow {
                window_start: Instant::now(),
                count: 0,
            });
        let now = Instant::now();
        if now.duration_since(entry.window_start) >= std::time::Duration::from_secs(60) {
            entry.window_start = now;
            entry.count = 0;
        }
        if entry.count >= auth.limit_per_minute {
            return Ok(too_many_requests());
        }
        entry.count += 1;
    }

    req.extensions_mut()
        .insert(AuthContext::new(identity.tenant_id, identity.organizations));

    Ok(next.run(req).await)
}

fn extract_token(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ── Error helpers ───────────────────────────────────────────────────

pub fn unauthorized(msg: &str) -> Response {
    (
        axum::http::StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": {"code": "unauthorized", "message": msg}})),
    )
        .into_response()
}

pub fn too_many_requests() -> Response {
    (
        axum::http::StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({"error": {"code": "rate_limited", "message": "rate limited"}})),
    )
        .into_response()
}
