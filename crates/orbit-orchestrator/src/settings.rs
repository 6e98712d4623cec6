//! Platform settings: organizations, quota classes and reference
//! configurations.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use orbit_common::{DeploymentKind, OrbitError, OrbitResult, Organization, ReferenceConfig, TenantClass};
use serde::Deserialize;
use serde_json::Value;

const EMBEDDED_SETTINGS: &str = include_str!("../conf/settings.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub datacenters: Vec<String>,
    #[serde(default)]
    pub reserved_subdomains: Vec<String>,
    #[serde(default)]
    pub priority: Priorities,
    /// Seconds a finished job is kept, keyed by kind (`inference`, `try-me`).
    #[serde(default)]
    pub retention: BTreeMap<String, u64>,
    pub organizations: Vec<Organization>,
    /// Keyed by tenant class (`standard`, `restricted`).
    #[serde(default)]
    pub quotas: BTreeMap<String, QuotaClass>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Priorities {
    #[serde(default = "default_standard_priority")]
    pub standard: i64,
    #[serde(default = "default_restricted_priority")]
    pub restricted: i64,
}

fn default_standard_priority() -> i64 {
    50
}

fn default_restricted_priority() -> i64 {
    25
}

impl Default for Priorities {
    fn default() -> Self {
        Self {
            standard: default_standard_priority(),
            restricted: default_restricted_priority(),
        }
    }
}

/// Quota rules of a tenant class.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QuotaClass {
    /// Forbid GPUs regardless of the reference range.
    #[serde(default)]
    pub gpu_hard_zero: bool,
    /// Replacements for hardware parameters, keyed by dimension.
    #[serde(default)]
    pub overrides: BTreeMap<String, ParamOverride>,
    /// Per-kind ceilings of the sum over a tenant's active deployments.
    #[serde(default)]
    pub ceilings: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParamOverride {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub range: Option<[f64; 2]>,
    #[serde(default)]
    pub options: Option<Vec<Value>>,
}

impl Settings {
    /// Settings compiled into the binary.
    pub fn embedded() -> OrbitResult<Self> {
        Self::from_toml(EMBEDDED_SETTINGS)
    }

    /// Load from `path`, or the embedded defaults when no path is given.
    pub fn load(path: Option<&Path>) -> OrbitResult<Self> {
        let Some(path) = path else {
            return Self::embedded();
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrbitError::Config(format!("cannot read settings '{}': {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> OrbitResult<Self> {
        let settings: Settings =
            toml::from_str(raw).map_err(|e| OrbitError::Config(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> OrbitResult<()> {
        if self.organizations.is_empty() {
            return Err(OrbitError::Config("no organizations configured".into()));
        }

        let mut names = BTreeSet::new();
        for org in &self.organizations {
            if org.namespace.trim().is_empty() || org.domain.trim().is_empty() {
                return Err(OrbitError::Config(format!(
                    "organization '{}' needs a namespace and a domain",
                    org.name
                )));
            }
            if !names.insert(org.name.as_str()) {
                return Err(OrbitError::Config(format!(
                    "organization '{}' is configured twice",
                    org.name
                )));
            }
        }

        for (class, quota) in &self.quotas {
            for (dim, o) in &quota.overrides {
                if let Some([min, max]) = o.range {
                    if min > max {
                        return Err(OrbitError::Config(format!(
                            "quota class '{class}': range of '{dim}' is empty ({min} > {max})"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn organization(&self, name: &str) -> OrbitResult<&Organization> {
        self.organizations
            .iter()
            .find(|o| o.name == name)
            .ok_or_else(|| OrbitError::validation(format!("unknown organization '{name}'")))
    }

    pub fn priority(&self, class: TenantClass) -> i64 {
        match class {
            TenantClass::Standard => self.priority.standard,
            TenantClass::Restricted => self.priority.restricted,
        }
    }

    pub fn retention_secs(&self, kind: DeploymentKind) -> Option<u64> {
        self.retention.get(kind.as_str()).copied()
    }

    pub fn quota_class(&self, class: TenantClass) -> QuotaClass {
        self.quotas.get(class.as_str()).cloned().unwrap_or_default()
    }
}

/// Reference configuration of every deployment kind.
#[derive(Debug, Clone)]
pub struct ReferenceCatalog {
    configs: BTreeMap<DeploymentKind, ReferenceConfig>,
}

impl ReferenceCatalog {
    pub fn embedded() -> OrbitResult<Self> {
        let mut configs = BTreeMap::new();
        for kind in DeploymentKind::ALL {
            let reference: ReferenceConfig = serde_json::from_str(embedded_reference(kind))
                .map_err(|e| {
                    OrbitError::Config(format!("invalid reference configuration for {kind}: {e}"))
                })?;
            configs.insert(kind, reference);
        }
        Ok(Self { configs })
    }

    pub fn get(&self, kind: DeploymentKind) -> OrbitResult<ReferenceConfig> {
        self.configs
            .get(&kind)
            .cloned()
            .ok_or_else(|| OrbitError::Config(format!("no reference configuration for {kind}")))
    }
}

fn embedded_reference(kind: DeploymentKind) -> &'static str {
    match kind {
        DeploymentKind::Module => include_str!("../conf/reference/module.json"),
        DeploymentKind::Tool => include_str!("../conf/reference/tool.json"),
        DeploymentKind::Batch => include_str!("../conf/reference/batch.json"),
        DeploymentKind::Inference => include_str!("../conf/reference/inference.json"),
        DeploymentKind::TryMe => include_str!("../conf/reference/try-me.json"),
        DeploymentKind::Snapshot => include_str!("../conf/reference/snapshot.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_settings_parse() {
        let s = Settings::embedded().unwrap();
        let org = s.organization("training.example.eu").unwrap();
        assert_eq!(org.class, TenantClass::Restricted);
        assert_eq!(s.priority(TenantClass::Restricted), 25);
        assert_eq!(s.retention_secs(DeploymentKind::TryMe), Some(600));

        let restricted = s.quota_class(TenantClass::Restricted);
        assert!(restricted.gpu_hard_zero);
        assert_eq!(restricted.overrides["cpu_num"].range, Some([2.0, 4.0]));
    }

    #[test]
    fn test_unknown_organization_is_validation_error() {
        let s = Settings::embedded().unwrap();
        assert!(matches!(
            s.organization("nope"),
            Err(OrbitError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_organization_rejected() {
        let raw = r#"
            [[organizations]]
            name = "a"
            namespace = "a"
            domain = "a.example"

            [[organizations]]
            name = "a"
            namespace = "b"
            domain = "b.example"
        "#;
        assert!(matches!(Settings::from_toml(raw), Err(OrbitError::Config(_))));
    }

    #[test]
    fn test_every_kind_has_a_reference() {
        let catalog = ReferenceCatalog::embedded().unwrap();
        for kind in DeploymentKind::ALL {
            let reference = catalog.get(kind).unwrap();
            assert!(reference.param("hardware", "cpu_num").is_some(), "{kind}");
        }
    }
}
