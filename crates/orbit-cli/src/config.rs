use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use orbit_common::PartialConfig;
use serde_json::Value;

/// Parse one `group.key=value` override. Values that read as JSON (numbers,
/// booleans, quoted strings) keep their type, anything else is a string.
pub fn parse_set(raw: &str) -> Result<(String, String, Value)> {
    let (path, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected GROUP.KEY=VALUE, got '{raw}'"))?;
    let (group, key) = path
        .trim()
        .split_once('.')
        .ok_or_else(|| anyhow!("expected GROUP.KEY before '=', got '{path}'"))?;
    if group.is_empty() || key.is_empty() {
        bail!("empty group or key in '{raw}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((group.to_string(), key.to_string(), value))
}

pub fn build_config(file: Option<&Path>, sets: &[String]) -> Result<PartialConfig> {
    let mut config = match file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => PartialConfig::new(),
    };
    for raw in sets {
        let (group, key, value) = parse_set(raw)?;
        config = config.with(&group, &key, value);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_set_keeps_json_types() {
        let (g, k, v) = parse_set("hardware.cpu_num=4").unwrap();
        assert_eq!((g.as_str(), k.as_str()), ("hardware", "cpu_num"));
        assert_eq!(v, json!(4));

        let (_, _, v) = parse_set("general.jupyter_password=s3cr=t").unwrap();
        assert_eq!(v, json!("s3cr=t"));

        let (_, _, v) = parse_set("general.title=\"42\"").unwrap();
        assert_eq!(v, json!("42"));
    }

    #[test]
    fn test_parse_set_rejects_malformed() {
        assert!(parse_set("cpu_num=4").is_err());
        assert!(parse_set("hardware.cpu_num").is_err());
        assert!(parse_set(".cpu_num=4").is_err());
    }

    #[test]
    fn test_sets_override_file() {
        let path = std::env::temp_dir().join(format!("orbit-cli-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"hardware": {"cpu_num": 2, "ram": 4000}}"#).unwrap();
        let cfg = build_config(Some(&path), &["hardware.cpu_num=8".to_string()]).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.0["hardware"]["cpu_num"], json!(8));
        assert_eq!(cfg.0["hardware"]["ram"], json!(4000));
    }
}
