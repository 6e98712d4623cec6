use orbit_common::{OrbitError, OrbitResult, PartialConfig, ReferenceConfig, ResolvedConfig};

/// Merge a tenant's partial configuration over the defaults of `reference`.
///
/// Every group and parameter of `partial` must exist in `reference`; the
/// error names all unknown keys at once.
pub fn resolve(partial: &PartialConfig, reference: &ReferenceConfig) -> OrbitResult<ResolvedConfig> {
    let mut unknown = Vec::new();
    for (group, params) in &partial.0 {
        let Some(known) = reference.0.get(group) else {
            unknown.push(group.clone());
            continue;
        };
        unknown.extend(
            params
                .keys()
                .filter(|k| !known.contains_key(*k))
                .map(|k| format!("{group}.{k}")),
        );
    }
    if !unknown.is_empty() {
        return Err(OrbitError::validation(format!(
            "unknown configuration keys: {}",
            unknown.join(", ")
        )));
    }

    let mut resolved = reference.values();
    for (group, params) in &partial.0 {
        for (key, value) in params {
            resolved.set(group, key, value.clone());
        }
    }
    Ok(resolved)
}
