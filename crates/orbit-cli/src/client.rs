pub fn auth(builder: reqwest::RequestBuilder, token: Option<&String>) -> reqwest::RequestBuilder {
    match token {
        Some(t) => builder.bearer_auth(t),
        None => builder,
    }
}

/// Build a v1 API URL, appending `?vo=` when an organization is selected.
pub fn api_url(base: &str, path: &str, vo: Option<&str>) -> String {
    let mut url = format!("{}/v1{}", base.trim_end_matches('/'), path);
    if let Some(vo) = vo {
        url.push_str("?vo=");
        url.push_str(vo);
    }
    url
}

/// Pull the message out of an API error body, falling back to the raw text.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        assert_eq!(
            api_url("http://h:8080/", "/deployments/tool", Some("vo.example.eu")),
            "http://h:8080/v1/deployments/tool?vo=vo.example.eu"
        );
        assert_eq!(api_url("http://h", "/cluster/stats", None), "http://h/v1/cluster/stats");
    }

    #[test]
    fn test_error_message() {
        let body = r#"{"error":{"code":"forbidden","message":"nope","request_id":"req_1"}}"#;
        assert_eq!(error_message(body), "nope");
        assert_eq!(error_message("bad gateway"), "bad gateway");
    }
}
