//! Placeholder substitution over JSON templates.
//!
//! A placeholder is `${NAME}` with `NAME` in upper snake case. Names starting
//! with `NOMAD_` and lower-case forms such as `${node.class}` belong to the
//! scheduler's own interpolation and are left untouched. A string that is
//! exactly one placeholder is replaced by the value itself, so numbers and
//! lists keep their type; a placeholder inside a longer string is replaced by
//! the value's text. Substituted text is never scanned again.

use std::collections::{BTreeMap, BTreeSet};

use orbit_common::{OrbitError, OrbitResult};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placeholders(BTreeMap<String, Value>);

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

fn is_placeholder(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with("NOMAD_")
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render `template` with `values`. Every placeholder must have a value; the
/// error lists all missing names.
pub fn render(template: &str, values: &Placeholders) -> OrbitResult<Value> {
    let mut doc: Value = serde_json::from_str(template)
        .map_err(|e| OrbitError::Template(format!("template is not valid JSON: {e}")))?;

    let mut missing = BTreeSet::new();
    substitute(&mut doc, values, &mut missing);
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(String::as_str).collect();
        return Err(OrbitError::Template(format!(
            "no value for placeholders: {}",
            names.join(", ")
        )));
    }
    Ok(doc)
}

fn substitute(node: &mut Value, values: &Placeholders, missing: &mut BTreeSet<String>) {
    let replaced = match node {
        Value::Array(items) => {
            for item in items {
                substitute(item, values, missing);
            }
            None
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute(v, values, missing);
            }
            None
        }
        Value::String(s) => substitute_str(s, values, missing),
        _ => None,
    };
    if let Some(r) = replaced {
        *node = r;
    }
}

/// `None` when the string holds no placeholder.
fn substitute_str(s: &str, values: &Placeholders, missing: &mut BTreeSet<String>) -> Option<Value> {
    if let Some(name) = s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        if is_placeholder(name) {
            return match values.get(name) {
                Some(v) => Some(v.clone()),
                None => {
                    missing.insert(name.to_string());
                    None
                }
            };
        }
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    let mut changed = false;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = &after[..end];
        if is_placeholder(name) {
            match values.get(name) {
                Some(v) => out.push_str(&text(v)),
                None => {
                    missing.insert(name.to_string());
                }
            }
            changed = true;
        } else {
            out.push_str(&rest[start..start + 2 + end + 1]);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    changed.then_some(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whole_string_keeps_type() {
        let mut v = Placeholders::new();
        v.set("CPU_NUM", 4);
        v.set("DCS", json!(["a", "b"]));
        let out = render(r#"{"Cores": "${CPU_NUM}", "Datacenters": "${DCS}"}"#, &v).unwrap();
        assert_eq!(out, json!({"Cores": 4, "Datacenters": ["a", "b"]}));
    }

    #[test]
    fn test_embedded_placeholder_and_scheduler_interpolation() {
        let mut v = Placeholders::new();
        v.set("IMAGE", "repo/app");
        v.set("TAG", "1.0");
        let out = render(
            r#"{"image": "${IMAGE}:${TAG}", "l": "${node.class}", "p": "${NOMAD_PORT_api}"}"#,
            &v,
        )
        .unwrap();
        assert_eq!(
            out,
            json!({"image": "repo/app:1.0", "l": "${node.class}", "p": "${NOMAD_PORT_api}"})
        );
    }

    #[test]
    fn test_values_are_not_rescanned_and_stay_escaped() {
        let mut v = Placeholders::new();
        v.set("PASSWORD", "a\"b${OTHER}");
        let out = render(r#"{"env": "pw=${PASSWORD}"}"#, &v).unwrap();
        assert_eq!(out, json!({"env": "pw=a\"b${OTHER}"}));
    }

    #[test]
    fn test_missing_placeholders_are_fatal() {
        let err = render(r#"{"a": "${ONE}", "b": ["x-${TWO}"]}"#, &Placeholders::new()).unwrap_err();
        assert_eq!(err, OrbitError::Template("no value for placeholders: ONE, TWO".into()));
    }
}
