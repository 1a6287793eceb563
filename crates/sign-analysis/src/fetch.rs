//! Bundle resolver: fetches the host page and the matching script asset.
//!
//! The caller owns retry policy; every fetch here is a single attempt.

use regex::Regex;
use reqwest::Client;
use tracing::debug;

use crate::types::{BundleSource, ExtractError};

/// Fetch the page at `page_url`, scan its external script references for
/// the first whose `src` contains `marker`, and fetch that script.
pub async fn fetch_bundle(
    client: &Client,
    page_url: &str,
    marker: &str,
) -> Result<BundleSource, ExtractError> {
    debug!("fetching page {page_url}");
    let html = fetch_text(client, page_url).await?;

    let src = find_script_src(&html, marker)
        .ok_or_else(|| ExtractError::ScriptNotFound(marker.to_string()))?;
    let script_url = resolve_script_url(page_url, &src);

    debug!("fetching script {script_url}");
    let raw_code = fetch_text(client, &script_url).await?;

    Ok(BundleSource {
        page_url: page_url.to_string(),
        script_marker: marker.to_string(),
        script_url,
        raw_code,
    })
}

async fn fetch_text(client: &Client, url: &str) -> Result<String, ExtractError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExtractError::Network { url: url.to_string(), status: status.as_u16() });
    }
    Ok(response.text().await?)
}

/// First external script reference whose `src` contains the marker.
/// Inline scripts carry no `src` attribute and never match.
fn find_script_src(html: &str, marker: &str) -> Option<String> {
    let script_regex =
        Regex::new(r#"(?i)<script[^>]*\bsrc\s*=\s*["']([^"']+)["']"#).expect("static pattern");
    let found = script_regex
        .captures_iter(html)
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .find(|src| src.contains(marker));
    found
}

/// Asset URLs in the markup may be absolute, protocol-relative or
/// path-absolute; resolve the latter two against the page origin.
fn resolve_script_url(page_url: &str, src: &str) -> String {
    if src.starts_with("http://") || src.starts_with("https://") {
        return src.to_string();
    }
    let scheme = page_url.split("://").next().unwrap_or("https");
    if let Some(rest) = src.strip_prefix("//") {
        return format!("{scheme}://{rest}");
    }
    let origin = page_origin(page_url);
    if src.starts_with('/') {
        format!("{origin}{src}")
    } else {
        format!("{origin}/{src}")
    }
}

fn page_origin(page_url: &str) -> String {
    match page_url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split('/').next().unwrap_or(rest);
            format!("{scheme}://{host}")
        }
        None => page_url.trim_end_matches('/').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <script>inline();</script>
        <script type="text/javascript" src="/static/runtime.js"></script>
        <script src="https://cdn.example.com/assets/2313.js" defer></script>
    </head><body></body></html>"#;

    #[test]
    fn finds_first_matching_external_script() {
        let src = find_script_src(PAGE, "2313.js").unwrap();
        assert_eq!(src, "https://cdn.example.com/assets/2313.js");
    }

    #[test]
    fn inline_scripts_never_match() {
        assert!(find_script_src(PAGE, "inline").is_none());
    }

    #[test]
    fn missing_marker_yields_none() {
        assert!(find_script_src(PAGE, "9999.js").is_none());
    }

    #[test]
    fn resolves_relative_sources_against_origin() {
        let page = "https://example.com/landing";
        assert_eq!(
            resolve_script_url(page, "/static/runtime.js"),
            "https://example.com/static/runtime.js"
        );
        assert_eq!(
            resolve_script_url(page, "//cdn.example.com/a.js"),
            "https://cdn.example.com/a.js"
        );
        assert_eq!(resolve_script_url(page, "https://x.test/a.js"), "https://x.test/a.js");
    }
}
