use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "orbit")]
#[command(about = "Orbit CLI for deployment management", long_about = None)]
pub struct Args {
    /// API URL
    #[arg(long, env = "ORBIT_API_URL", default_value = "http://127.0.0.1:8080")]
    pub api_url: String,

    /// API token (Authorization: Bearer)
    #[arg(long, env = "ORBIT_TOKEN")]
    pub token: Option<String>,

    /// Organization to act in; required when the token belongs to several
    #[arg(long, env = "ORBIT_VO")]
    pub vo: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deployment management
    Deployment {
        #[command(subcommand)]
        subcommand: DeploymentCommand,
    },
    /// Show the reference configuration of a kind
    Config {
        /// Deployment kind, e.g. module or try-me
        kind: String,
    },
    /// Cluster information
    Cluster {
        #[command(subcommand)]
        subcommand: ClusterCommand,
    },
    /// Show current auth identity
    Whoami,
}

#[derive(Debug, Subcommand)]
pub enum DeploymentCommand {
    /// List deployments of a kind
    List {
        #[arg(long, default_value = "module")]
        kind: String,
    },
    /// Show one deployment
    Get {
        job_id: String,
        #[arg(long, default_value = "module")]
        kind: String,
    },
    /// Create a deployment
    Create {
        #[arg(long, default_value = "module")]
        kind: String,
        /// Override a configuration value, e.g. `--set hardware.cpu_num=4`
        #[arg(long = "set", value_name = "GROUP.KEY=VALUE")]
        set: Vec<String>,
        /// JSON file with grouped overrides, applied before `--set`
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Stop and remove a deployment
    Delete {
        job_id: String,
        #[arg(long, default_value = "module")]
        kind: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ClusterCommand {
    /// Aggregate capacity of schedulable nodes
    Stats,
    /// GPU models available for requests
    GpuModels,
}
