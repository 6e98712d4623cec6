use std::sync::Arc;

use orbit_common::auth::AuthConfig;
use orbit_orchestrator::Orchestrator;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth: AuthConfig,
    pub metrics: Arc<Metrics>,
}

impl AsRef<AuthConfig> for AppState {
    fn as_ref(&self) -> &AuthConfig {
        &self.auth
    }
}
