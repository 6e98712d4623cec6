use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Two-level `group -> parameter -> value` mapping.
pub type ConfigGroups = BTreeMap<String, BTreeMap<String, Value>>;

/// Tenant-submitted configuration. Only a subset of the keys of the kind's
/// reference configuration is expected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PartialConfig(pub ConfigGroups);

impl PartialConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, group: &str, key: &str, value: impl Into<Value>) -> Self {
        self.0
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }
}

/// One parameter of a reference configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Param {
    /// Default value.
    pub value: Value,

    /// Inclusive `[min, max]` range for numeric parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,

    /// Allowed values, shown as a selector in the UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,

    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Param {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            range: None,
            options: None,
            name: None,
            description: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some([min, max]);
        self
    }
}

/// Default configuration of a deployment kind, including quota metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ReferenceConfig(pub BTreeMap<String, BTreeMap<String, Param>>);

impl ReferenceConfig {
    pub fn param(&self, group: &str, key: &str) -> Option<&Param> {
        self.0.get(group).and_then(|g| g.get(key))
    }

    pub fn param_mut(&mut self, group: &str, key: &str) -> Option<&mut Param> {
        self.0.get_mut(group).and_then(|g| g.get_mut(key))
    }

    /// Strip the metadata, keeping only default values.
    pub fn values(&self) -> ResolvedConfig {
        let groups = self
            .0
            .iter()
            .map(|(group, params)| {
                let values = params
                    .iter()
                    .map(|(k, p)| (k.clone(), p.value.clone()))
                    .collect();
                (group.clone(), values)
            })
            .collect();
        ResolvedConfig(groups)
    }
}

/// Fully populated configuration of a deployment, after merging the tenant's
/// partial configuration over the reference defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ResolvedConfig(pub ConfigGroups);

impl ResolvedConfig {
    pub fn get(&self, group: &str, key: &str) -> Option<&Value> {
        self.0.get(group).and_then(|g| g.get(key))
    }

    pub fn set(&mut self, group: &str, key: &str, value: impl Into<Value>) {
        self.0
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// String value, `None` when absent, null or empty.
    pub fn str(&self, group: &str, key: &str) -> Option<&str> {
        match self.get(group, key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Textual rendering of any scalar value; empty for absent/null.
    pub fn text(&self, group: &str, key: &str) -> String {
        match self.get(group, key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Finite numeric value; numeric strings are accepted as well.
    pub fn number(&self, group: &str, key: &str) -> Option<f64> {
        let n = match self.get(group, key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        n.is_finite().then_some(n)
    }

    pub fn integer(&self, group: &str, key: &str) -> Option<i64> {
        self.number(group, key).map(|n| n.round() as i64)
    }

    /// List of strings; a single string is treated as a one-element list.
    pub fn string_list(&self, group: &str, key: &str) -> Vec<String> {
        match self.get(group, key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
                    Value::Object(o) => o.get("doi").and_then(|d| d.as_str()).map(str::to_string),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_values_drop_metadata() {
        let mut reference = ReferenceConfig::default();
        reference
            .0
            .entry("hardware".into())
            .or_default()
            .insert("cpu_num".into(), Param::new(4).with_range(1.0, 8.0));

        let values = reference.values();
        assert_eq!(values.get("hardware", "cpu_num"), Some(&json!(4)));
    }

    #[test]
    fn test_resolved_accessors() {
        let mut cfg = ResolvedConfig::default();
        cfg.set("hardware", "ram", "8000");
        cfg.set("general", "title", "");
        cfg.set("storage", "datasets", json!(["10.5281/zenodo.1", {"doi": "10.5281/zenodo.2"}]));

        assert_eq!(cfg.number("hardware", "ram"), Some(8000.0));
        assert_eq!(cfg.str("general", "title"), None);
        assert_eq!(cfg.text("hardware", "ram"), "8000");
        assert_eq!(
            cfg.string_list("storage", "datasets"),
            vec!["10.5281/zenodo.1".to_string(), "10.5281/zenodo.2".to_string()]
        );
    }

    #[test]
    fn test_non_finite_strings_are_not_numbers() {
        let mut cfg = ResolvedConfig::default();
        for raw in ["NaN", "inf", "-infinity"] {
            cfg.set("hardware", "ram", raw);
            assert_eq!(cfg.number("hardware", "ram"), None, "{raw}");
            assert_eq!(cfg.integer("hardware", "ram"), None, "{raw}");
        }
    }
}
