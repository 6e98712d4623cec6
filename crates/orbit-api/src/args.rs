use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchedulerBackend {
    Nomad,
    /// In-process scheduler; jobs are accepted but never run.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackend {
    Memory,
    Etcd,
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[arg(long, env = "ORBIT_API_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    #[arg(long, env = "ORBIT_SCHEDULER", value_enum, default_value = "nomad")]
    pub scheduler: SchedulerBackend,

    #[arg(long, env = "NOMAD_ADDR", default_value = "http://127.0.0.1:4646")]
    pub nomad_addr: String,

    #[arg(long, env = "NOMAD_TOKEN")]
    pub nomad_token: Option<String>,

    /// Seconds before a scheduler request is abandoned.
    #[arg(long, env = "ORBIT_SCHEDULER_TIMEOUT", default_value_t = 30)]
    pub scheduler_timeout: u64,

    /// Platform settings (TOML). The embedded defaults are used when unset.
    #[arg(long, env = "ORBIT_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[arg(long, env = "ORBIT_CACHE_BACKEND", value_enum, default_value = "memory")]
    pub cache_backend: CacheBackend,

    #[arg(long, env = "ETCD_ENDPOINT", default_value = "http://127.0.0.1:2379")]
    pub etcd_endpoint: String,

    /// Seconds cluster views (GPU models, capacity) are cached.
    #[arg(long, env = "ORBIT_CACHE_TTL", default_value_t = 300)]
    pub cache_ttl: u64,

    /// Seconds a hostname probe may take.
    #[arg(long, env = "ORBIT_PROBE_TIMEOUT", default_value_t = 5)]
    pub probe_timeout: u64,

    /// Private registry whose images get pull credentials.
    #[arg(long, env = "ORBIT_REGISTRY_HOST")]
    pub registry_host: Option<String>,

    #[arg(long, env = "ORBIT_REGISTRY_USER")]
    pub registry_user: Option<String>,

    #[arg(long, env = "ORBIT_REGISTRY_PASSWORD")]
    pub registry_password: Option<String>,

    /// OTLP endpoint for exporting traces.
    #[arg(long, env = "ORBIT_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP collector.
    #[arg(long, env = "ORBIT_OTLP_TOKEN")]
    pub otlp_token: Option<String>,

    /// Log output format: "text" or "json".
    #[arg(long, env = "ORBIT_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}
