use anyhow::{Context, Result};
use std::time::Duration;

/// Loads the candidate list text from either an `http(s)://` URL or a local
/// file path, mirroring the teacher crate's `reqwest::Client` usage.
pub async fn load_source_text(source: &str) -> Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build source-fetch HTTP client")?;
        let response = client
            .get(source)
            .send()
            .await
            .with_context(|| format!("failed to fetch source list from {source}"))?
            .error_for_status()
            .with_context(|| format!("source list request to {source} returned an error status"))?;
        response
            .text()
            .await
            .context("failed to read source list response body")
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("failed to read source list file: {source}"))
    }
}
