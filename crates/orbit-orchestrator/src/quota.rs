//! Job-wise and tenant-wise resource limits.

use std::collections::BTreeMap;

use orbit_common::{
    DeploymentKind, DeploymentResources, OrbitError, OrbitResult, ReferenceConfig, ResolvedConfig,
};
use serde_json::{json, Value};

use crate::settings::QuotaClass;

/// Group of the reference configuration that holds hardware dimensions.
pub const HARDWARE: &str = "hardware";

/// Quota rules of one tenant class.
#[derive(Debug, Clone, Default)]
pub struct QuotaPolicy {
    class: QuotaClass,
}

impl QuotaPolicy {
    pub fn new(class: QuotaClass) -> Self {
        Self { class }
    }

    /// Replace defaults, ranges and options of the hardware dimensions the
    /// class overrides. Must run before resolving and checking.
    pub fn apply_overrides(&self, reference: &mut ReferenceConfig) {
        for (dim, o) in &self.class.overrides {
            let Some(param) = reference.param_mut(HARDWARE, dim) else {
                continue;
            };
            if let Some(value) = &o.value {
                param.value = value.clone();
            }
            if let Some(range) = o.range {
                param.range = Some(range);
            }
            if let Some(options) = &o.options {
                param.options = Some(options.clone());
            }
        }

        if self.class.gpu_hard_zero {
            if let Some(gpu) = reference.param_mut(HARDWARE, "gpu_num") {
                gpu.value = json!(0);
                gpu.range = Some([0.0, 0.0]);
            }
            if let Some(model) = reference.param_mut(HARDWARE, "gpu_type") {
                model.value = json!("");
                model.options = Some(vec![json!("")]);
            }
        }
    }

    /// Every parameter with a declared range must fall inside it.
    pub fn check_jobwise(&self, resolved: &ResolvedConfig, reference: &ReferenceConfig) -> OrbitResult<()> {
        if self.class.gpu_hard_zero && resolved.number(HARDWARE, "gpu_num").unwrap_or(0.0) > 0.0 {
            return Err(OrbitError::quota(
                "gpu_num",
                "GPUs are not available to this organization",
            ));
        }

        for (group, params) in &reference.0 {
            for (key, param) in params {
                let Some([min, max]) = param.range else {
                    continue;
                };
                let value = match resolved.get(group, key) {
                    Some(Value::Null) | None => continue,
                    Some(_) => resolved.number(group, key).ok_or_else(|| {
                        OrbitError::validation(format!("'{group}.{key}' must be a number"))
                    })?,
                };
                if value < min {
                    return Err(OrbitError::quota(
                        key.as_str(),
                        format!("{value} is below the minimum {min}"),
                    ));
                }
                if value > max {
                    return Err(OrbitError::quota(
                        key.as_str(),
                        format!("{value} is above the maximum {max}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Tenant-wise ceilings for `kind`, if the class declares any.
    pub fn ceilings(&self, kind: DeploymentKind) -> Option<&BTreeMap<String, f64>> {
        self.class.ceilings.get(kind.as_str()).filter(|c| !c.is_empty())
    }

    /// The request plus the tenant's active deployments of the same kind must
    /// stay under every ceiling. `active` is a snapshot taken before the
    /// check, so concurrent creations can both pass.
    pub fn check_userwise(
        &self,
        kind: DeploymentKind,
        request: &DeploymentResources,
        active: &[DeploymentResources],
    ) -> OrbitResult<()> {
        let Some(ceilings) = self.ceilings(kind) else {
            return Ok(());
        };

        for (dim, ceiling) in ceilings {
            let Some(requested) = dimension(request, dim) else {
                tracing::warn!(dimension = %dim, "ignoring ceiling on unknown dimension");
                continue;
            };
            let in_use: f64 = active.iter().filter_map(|r| dimension(r, dim)).sum();
            let total = in_use + requested;
            if total > *ceiling {
                return Err(OrbitError::quota(
                    dim.as_str(),
                    format!(
                        "{total} across your active {kind} deployments would exceed the ceiling {ceiling}"
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn dimension(res: &DeploymentResources, dim: &str) -> Option<f64> {
    match dim {
        "cpu_num" => Some(res.cpu_num as f64),
        "ram" => Some(res.memory_mb as f64),
        "disk" => Some(res.disk_mb as f64),
        "gpu_num" => Some(res.gpu_num as f64),
        _ => None,
    }
}

/// Hardware requested by a resolved configuration.
pub fn requested_resources(resolved: &ResolvedConfig) -> DeploymentResources {
    let int = |key: &str| resolved.integer(HARDWARE, key).unwrap_or(0).max(0);
    DeploymentResources {
        cpu_num: int("cpu_num") as u32,
        memory_mb: int("ram") as u64,
        disk_mb: int("disk") as u64,
        gpu_num: int("gpu_num") as u32,
        gpu_models: resolved
            .str(HARDWARE, "gpu_type")
            .map(|m| vec![m.to_string()])
            .unwrap_or_default(),
    }
}
