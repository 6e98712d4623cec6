mod args;
mod client;
mod config;
mod output;

use anyhow::Result;
use clap::Parser;
use reqwest::Client;

use orbit_common::{ClusterStats, CreateOutcome, Deployment, ReferenceConfig};

use crate::args::{Args, ClusterCommand, Command, DeploymentCommand};
use crate::client::{api_url, auth, error_message};
use crate::config::build_config;
use crate::output::{print_cluster_stats, print_deployment, print_deployments, print_reference};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = Client::new();
    let token = args.token;
    let vo = args.vo.as_deref();

    match args.command {
        Command::Deployment { subcommand } => match subcommand {
            DeploymentCommand::List { kind } => {
                let url = api_url(&args.api_url, &format!("/deployments/{kind}"), vo);
                let resp = auth(client.get(&url), token.as_ref()).send().await?;
                if resp.status().is_success() {
                    let deployments: Vec<Deployment> = resp.json().await?;
                    print_deployments(&deployments);
                } else {
                    eprintln!("✗ Failed to list deployments: {}", error_message(&resp.text().await?));
                }
            }
            DeploymentCommand::Get { job_id, kind } => {
                let url = api_url(&args.api_url, &format!("/deployments/{kind}/{job_id}"), vo);
                let resp = auth(client.get(&url), token.as_ref()).send().await?;
                if resp.status().is_success() {
                    let deployment: Deployment = resp.json().await?;
                    print_deployment(&deployment);
                } else {
                    eprintln!("✗ Failed to get deployment: {}", error_message(&resp.text().await?));
                }
            }
            DeploymentCommand::Create { kind, set, file } => {
                let body = build_config(file.as_deref(), &set)?;
                let url = api_url(&args.api_url, &format!("/deployments/{kind}"), vo);
                let resp = auth(client.post(&url), token.as_ref())
                    .json(&body)
                    .send()
                    .await?;
                if resp.status().is_success() {
                    match resp.json::<CreateOutcome>().await? {
                        CreateOutcome::Success { job_id } => {
                            println!("✓ Deployment '{}' submitted", job_id);
                        }
                        CreateOutcome::Fail { error_msg } => {
                            eprintln!("✗ Scheduler rejected the deployment: {}", error_msg);
                        }
                    }
                } else {
                    eprintln!("✗ Failed to create deployment: {}", error_message(&resp.text().await?));
                }
            }
            DeploymentCommand::Delete { job_id, kind } => {
                let url = api_url(&args.api_url, &format!("/deployments/{kind}/{job_id}"), vo);
                let resp = auth(client.delete(&url), token.as_ref()).send().await?;
                if resp.status().is_success() {
                    println!("✓ Deployment '{}' deleted", job_id);
                } else {
                    eprintln!("✗ Failed to delete deployment: {}", error_message(&resp.text().await?));
                }
            }
        },
        Command::Config { kind } => {
            let url = api_url(&args.api_url, &format!("/catalog/{kind}/config"), vo);
            let resp = auth(client.get(&url), token.as_ref()).send().await?;
            if resp.status().is_success() {
                let cfg: ReferenceConfig = resp.json().await?;
                print_reference(&kind, &cfg);
            } else {
                eprintln!("✗ Failed to get configuration: {}", error_message(&resp.text().await?));
            }
        }
        Command::Cluster { subcommand } => match subcommand {
            ClusterCommand::Stats => {
                let url = api_url(&args.api_url, "/cluster/stats", None);
                let resp = auth(client.get(&url), token.as_ref()).send().await?;
                if resp.status().is_success() {
                    let stats: ClusterStats = resp.json().await?;
                    print_cluster_stats(&stats);
                } else {
                    eprintln!("✗ Failed to get cluster stats: {}", error_message(&resp.text().await?));
                }
            }
            ClusterCommand::GpuModels => {
                let url = api_url(&args.api_url, "/cluster/gpu-models", None);
                let resp = auth(client.get(&url), token.as_ref()).send().await?;
                if resp.status().is_success() {
                    let models: Vec<String> = resp.json().await?;
                    if models.is_empty() {
                        println!("No GPU models available.");
                    }
                    for m in models {
                        println!("{m}");
                    }
                } else {
                    eprintln!("✗ Failed to list GPU models: {}", error_message(&resp.text().await?));
                }
            }
        },
        Command::Whoami => {
            let url = api_url(&args.api_url, "/whoami", None);
            let resp = auth(client.get(&url), token.as_ref()).send().await?;
            let body: serde_json::Value = resp.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}
