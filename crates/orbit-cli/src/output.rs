use chrono::{DateTime, Utc};
use orbit_common::{ClusterStats, Deployment, ReferenceConfig};

fn submitted(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn gpus(d: &Deployment) -> String {
    let r = &d.resources;
    if r.gpu_num == 0 {
        return "-".to_string();
    }
    if r.gpu_models.is_empty() {
        r.gpu_num.to_string()
    } else {
        format!("{} ({})", r.gpu_num, r.gpu_models.join(","))
    }
}

pub fn print_deployments(deployments: &[Deployment]) {
    println!("\n=== Orbit Deployments ===\n");
    if deployments.is_empty() {
        println!("No deployments found.");
        return;
    }
    println!(
        "{:<38} {:<25} {:<10} {:<6} {:<20} {:<17}",
        "Job ID", "Title", "Status", "CPUs", "GPUs", "Submitted"
    );
    println!("{:-<120}", "");
    for d in deployments {
        let title = if d.title.is_empty() { &d.name } else { &d.title };
        println!(
            "{:<38} {:<25} {:<10} {:<6} {:<20} {:<17}",
            d.job_id,
            title,
            d.status.as_str(),
            d.resources.cpu_num,
            gpus(d),
            submitted(d.submit_time_ms)
        );
    }
    println!();
}

pub fn print_deployment(d: &Deployment) {
    println!("\n=== Deployment {} ===\n", d.job_id);
    println!("  {:<14} {}", "Kind", d.kind);
    println!("  {:<14} {}", "Name", d.name);
    if !d.title.is_empty() {
        println!("  {:<14} {}", "Title", d.title);
    }
    println!("  {:<14} {}", "Status", d.status);
    if let Some(msg) = &d.error_msg {
        println!("  {:<14} {}", "Error", msg);
    }
    if let Some(image) = &d.docker_image {
        println!("  {:<14} {}", "Image", image);
    }
    println!("  {:<14} {}", "Submitted", submitted(d.submit_time_ms));

    let r = &d.resources;
    println!("\n[Resources]");
    println!("  {:<14} {}", "CPUs", r.cpu_num);
    println!("  {:<14} {} MiB", "Memory", r.memory_mb);
    println!("  {:<14} {} MiB", "Disk", r.disk_mb);
    println!("  {:<14} {}", "GPUs", gpus(d));

    println!("\n[Endpoints]");
    if d.endpoints.is_empty() {
        println!("  (No endpoints)");
    }
    for (label, url) in &d.endpoints {
        let marker = if d.main_endpoint.as_deref() == Some(label.as_str()) { "*" } else { " " };
        println!(" {marker}{:<14} {}", label, url);
    }
    println!();
}

pub fn print_reference(kind: &str, cfg: &ReferenceConfig) {
    println!("\n=== Reference configuration: {kind} ===");
    for (group, params) in &cfg.0 {
        println!("\n[{group}]");
        for (key, p) in params {
            let mut line = format!("  {:<22} {}", key, p.value);
            if let Some([min, max]) = p.range {
                line.push_str(&format!("  range [{min}, {max}]"));
            }
            if let Some(opts) = &p.options {
                let opts: Vec<String> = opts.iter().map(|o| o.to_string()).collect();
                line.push_str(&format!("  options [{}]", opts.join(", ")));
            }
            println!("{line}");
        }
    }
    println!();
}

pub fn print_cluster_stats(stats: &ClusterStats) {
    println!("\n=== Orbit Cluster Capacity ===\n");
    println!("  {:<10} {}", "CPUs", stats.cpu_total);
    println!("  {:<10} {} MiB", "Memory", stats.memory_total_mb);
    println!("  {:<10} {} MiB", "Disk", stats.disk_total_mb);
    println!("  {:<10} {}", "GPUs", stats.gpu_total);
    println!("  {:<10} {}", "As of", submitted(stats.computed_at_ms));

    println!("\n[Nodes]");
    if stats.nodes.is_empty() {
        println!("  (No schedulable nodes)");
        return;
    }
    println!(
        "  {:<20} {:<12} {:<8} {:<12} {:<20}",
        "Node", "Class", "CPUs", "Memory", "GPUs"
    );
    for n in &stats.nodes {
        let gpus = if n.gpu_models.is_empty() {
            n.gpu_total.to_string()
        } else {
            format!("{} ({})", n.gpu_total, n.gpu_models.join(","))
        };
        println!(
            "  {:<20} {:<12} {:<8} {:<12} {:<20}",
            n.name,
            n.node_class,
            n.cpu_total,
            format!("{} MiB", n.memory_total_mb),
            gpus
        );
    }
    println!();
}
