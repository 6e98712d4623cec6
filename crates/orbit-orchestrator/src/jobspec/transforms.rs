//! Structural edits applied to a rendered job, one function per edit.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::scheduler::types::{Constraint, Job, Lifecycle, Resources, Task, Template, PRIMARY_TASK};

pub const STORAGE_TASK: &str = "storage_mount";
pub const DATASET_TASK_PREFIX: &str = "dataset_download";
pub const DATASET_DOWNLOADER_IMAGE: &str = "registry.example.eu/platform/dataset-downloader:latest";

const NODE_CLASS: &str = "${node.class}";

/// Size the GPU device block of the primary task.
///
/// With no GPU requested the device block is removed; without a model the
/// model constraint is dropped so any GPU matches.
pub fn set_gpu_request(job: &mut Job, count: i64, model: Option<&str>) {
    let Some(task) = job.primary_task_mut() else {
        return;
    };
    if count <= 0 {
        task.resources.devices.retain(|d| !d.is_gpu());
        return;
    }
    for device in task.resources.devices.iter_mut().filter(|d| d.is_gpu()) {
        device.count = count;
        match model.filter(|m| !m.is_empty()) {
            Some(m) => {
                for c in device.constraints.iter_mut().filter(|c| c.l_target == "${device.model}") {
                    c.r_target = m.to_string();
                }
            }
            None => device.constraints.retain(|c| c.l_target != "${device.model}"),
        }
    }
}

/// Remove ports, networks and routed services.
pub fn strip_networking(job: &mut Job) {
    for group in &mut job.task_groups {
        group.networks.clear();
        group.services.clear();
        for task in &mut group.tasks {
            task.config.remove("ports");
        }
    }
}

/// Ship `script` with the job and run it instead of the image's command.
pub fn inline_entrypoint_script(job: &mut Job, script: &str) {
    let Some(task) = job.primary_task_mut() else {
        return;
    };
    let mut tmpl = Template {
        embedded_tmpl: script.to_string(),
        dest_path: "local/entrypoint.sh".to_string(),
        perms: "755".to_string(),
        ..Template::default()
    };
    // tenant scripts may contain the template engine's default delimiters
    tmpl.extra.insert("LeftDelim".into(), json!("[[orbit:"));
    tmpl.extra.insert("RightDelim".into(), json!(":orbit]]"));
    task.templates.push(tmpl);

    task.config.remove("command");
    task.config.remove("args");
    task.config.insert(
        "entrypoint".into(),
        json!(["/bin/bash", "/local/entrypoint.sh"]),
    );
}

/// Neither restart nor reschedule the job once it fails.
pub fn disable_restarts(job: &mut Job) {
    for group in &mut job.task_groups {
        let policy = group.restart_policy.get_or_insert_with(Default::default);
        policy.attempts = 0;
        policy.mode = "fail".to_string();
        group.extra.insert(
            "ReschedulePolicy".into(),
            json!({"Attempts": 0, "Unlimited": false}),
        );
    }
}

/// One prestart task per dataset, downloading it into the shared storage.
pub fn add_dataset_downloads(job: &mut Job, dois: &[String]) {
    let Some(group) = job.primary_group_mut() else {
        return;
    };
    let storage_env: BTreeMap<String, String> = group
        .task(PRIMARY_TASK)
        .map(|t| {
            t.env
                .iter()
                .filter(|(k, _)| k.starts_with("RCLONE_"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let position = group
        .tasks
        .iter()
        .position(|t| t.name == PRIMARY_TASK)
        .unwrap_or(group.tasks.len());

    let downloads = dois.iter().enumerate().map(|(i, doi)| {
        let mut env = storage_env.clone();
        env.insert("DOI".into(), doi.clone());

        let mut config = Map::new();
        config.insert("image".into(), json!(DATASET_DOWNLOADER_IMAGE));
        config.insert("args".into(), json!(["--doi", doi, "--dest", "/storage/datasets"]));
        config.insert("volumes".into(), json!(["../alloc/data/storage:/storage:rshared"]));

        Task {
            name: format!("{DATASET_TASK_PREFIX}_{i}"),
            driver: "docker".to_string(),
            config,
            env,
            resources: Resources {
                cores: 1,
                memory_mb: 2000,
                ..Resources::default()
            },
            lifecycle: Some(Lifecycle {
                hook: "prestart".to_string(),
                sidecar: false,
            }),
            ..Task::default()
        }
    });
    let downloads: Vec<Task> = downloads.collect();
    group.tasks.splice(position..position, downloads);
}

/// Let the job run on batch nodes as well as compute nodes.
pub fn relax_node_class(job: &mut Job) {
    for c in job.constraints.iter_mut() {
        if c.l_target == NODE_CLASS && c.operand == "=" && c.r_target == "compute" {
            c.operand = "regexp".to_string();
            c.r_target = "compute|batch".to_string();
        }
    }
}

/// Prefer batch nodes over CPU nodes.
pub fn prefer_batch_nodes(job: &mut Job) {
    for a in job.affinities.iter_mut() {
        if a.l_target == NODE_CLASS && a.r_target == "cpu" {
            a.r_target = "batch".to_string();
        }
    }
}

/// Remove the storage mount and anything depending on it.
pub fn strip_storage_tasks(job: &mut Job) {
    for group in &mut job.task_groups {
        group
            .tasks
            .retain(|t| t.name != STORAGE_TASK && !t.name.starts_with(DATASET_TASK_PREFIX));
    }
}

/// Grace period between the terminate signal and the kill at the deadline.
pub const RETENTION_KILL_AFTER_SECS: u64 = 30;

/// Bound the life of an ephemeral job.
///
/// The job runs once as a batch job and is never restarted or rescheduled,
/// so it is gone from the cluster when the primary task exits. With a
/// non-zero `seconds` the primary task is also wrapped in `timeout`, which
/// stops it at the deadline whether or not it finished.
pub fn set_retention(job: &mut Job, seconds: u64) {
    job.job_type = "batch".to_string();
    disable_restarts(job);
    job.meta.insert("retention_secs".into(), seconds.to_string());
    if seconds == 0 {
        return;
    }
    if let Some(task) = job.primary_task_mut() {
        task.config.insert(
            "entrypoint".into(),
            json!([
                "timeout",
                "-k",
                RETENTION_KILL_AFTER_SECS.to_string(),
                seconds.to_string()
            ]),
        );
        task.env
            .insert("ORBIT_RETENTION_SECONDS".into(), seconds.to_string());
    }
}

/// Force placement on one node.
pub fn pin_to_node(job: &mut Job, node_id: &str) {
    job.constraints
        .retain(|c| c.l_target != "${node.unique.id}");
    job.constraints
        .push(Constraint::new("${node.unique.id}", "=", node_id));
}

/// Private registry credentials, used only for images hosted there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub host: String,
    pub username: String,
    pub password: String,
}

/// Registry host of an image reference, `None` for Docker Hub images.
pub fn image_registry(image: &str) -> Option<&str> {
    let (first, _) = image.split_once('/')?;
    (first.contains('.') || first.contains(':') || first == "localhost").then_some(first)
}

pub fn apply_registry_auth(job: &mut Job, registry: &RegistryAuth) {
    let Some(task) = job.primary_task_mut() else {
        return;
    };
    let hosted = task
        .image()
        .and_then(image_registry)
        .is_some_and(|h| h.eq_ignore_ascii_case(&registry.host));
    if hosted {
        task.config.insert(
            "auth".into(),
            json!({"username": registry.username, "password": registry.password}),
        );
    }
}

/// Whether a config map value carries any content.
pub(crate) fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}
