use serde::{Deserialize, Serialize};

/// Quota class of an organization.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TenantClass {
    #[default]
    Standard,
    /// Trial / tutorial tenants: narrower ranges, lower priority, no GPUs.
    Restricted,
}

impl TenantClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantClass::Standard => "standard",
            TenantClass::Restricted => "restricted",
        }
    }
}

/// A virtual organization: one scheduler namespace and one routing domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    /// Identifier used by clients, e.g. `vo.example.eu`.
    pub name: String,
    /// Scheduler namespace the organization's jobs live in.
    pub namespace: String,
    /// Base domain under which deployment hostnames are allocated.
    pub domain: String,
    #[serde(default)]
    pub class: TenantClass,
}
