//! URL helpers shared by the relay and the client front ends.

/// Trims trailing slashes so endpoint paths can be appended safely.
///
/// ```
/// use chatrelay::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.openai.com/v1/"), "https://api.openai.com/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Joins a provider base URL and an endpoint path with exactly one slash.
///
/// ```
/// use chatrelay::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.anthropic.com/v1/", "/complete"),
///     "https://api.anthropic.com/v1/complete"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalize_base_url(base_url), endpoint)
}

/// Form of `url` that is safe to log: no credentials, no query string.
///
/// GET-bound requests carry the whole conversation in the query, so only
/// scheme, host and path are kept.
pub fn redact_url(url: &str) -> String {
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return "<invalid url>".to_string();
    };
    // Both only fail for cannot-be-a-base URLs, which carry no userinfo.
    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    if parsed.path() == "/" {
        parsed.as_str().trim_end_matches('/').to_string()
    } else {
        parsed.into()
    }
}
