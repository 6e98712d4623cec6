use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The family of workload a deployment belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentKind {
    /// Interactive development environment around a catalog module.
    Module,
    /// Long-running platform tool (federated server, annotation UI, ...).
    Tool,
    /// One-shot script run to completion.
    Batch,
    /// Ephemeral inference job, removed once finished.
    Inference,
    /// Short-lived demo of a module that is killed automatically.
    TryMe,
    /// Container snapshot of a running deployment.
    Snapshot,
}

impl DeploymentKind {
    pub const ALL: [DeploymentKind; 6] = [
        DeploymentKind::Module,
        DeploymentKind::Tool,
        DeploymentKind::Batch,
        DeploymentKind::Inference,
        DeploymentKind::TryMe,
        DeploymentKind::Snapshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentKind::Module => "module",
            DeploymentKind::Tool => "tool",
            DeploymentKind::Batch => "batch",
            DeploymentKind::Inference => "inference",
            DeploymentKind::TryMe => "try-me",
            DeploymentKind::Snapshot => "snapshot",
        }
    }

    /// Kinds that the scheduler removes on its own once they finish or expire.
    pub fn is_ephemeral(self) -> bool {
        matches!(
            self,
            DeploymentKind::Batch | DeploymentKind::Inference | DeploymentKind::TryMe
        )
    }

    /// Kinds reachable through a routed hostname.
    pub fn is_routable(self) -> bool {
        matches!(
            self,
            DeploymentKind::Module | DeploymentKind::Tool | DeploymentKind::TryMe
        )
    }
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" | "modules" => Ok(DeploymentKind::Module),
            "tool" | "tools" => Ok(DeploymentKind::Tool),
            "batch" => Ok(DeploymentKind::Batch),
            "inference" => Ok(DeploymentKind::Inference),
            "try-me" | "try_me" => Ok(DeploymentKind::TryMe),
            "snapshot" | "snapshots" => Ok(DeploymentKind::Snapshot),
            other => Err(format!(
                "unknown deployment kind '{other}', available: module, tool, batch, inference, try-me, snapshot"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_accepts_plural_routes() {
        assert_eq!("modules".parse::<DeploymentKind>(), Ok(DeploymentKind::Module));
        assert_eq!("try-me".parse::<DeploymentKind>(), Ok(DeploymentKind::TryMe));
        assert!("cluster".parse::<DeploymentKind>().is_err());
    }

    #[test]
    fn test_kind_serde_uses_kebab_case() {
        let s = serde_json::to_string(&DeploymentKind::TryMe).unwrap();
        assert_eq!(s, "\"try-me\"");
    }
}
