use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ProviderError;

/// GET `url` with `query` and return the response body.
///
/// Status codes are mapped onto [`ProviderError`]; the body is only returned
/// for 2xx responses.
pub(crate) async fn get_text(
    http: &Client,
    provider: &str,
    url: &str,
    query: &[(&str, String)],
) -> Result<String, ProviderError> {
    debug!(provider, url, "sending request");

    let res = http
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| transport(provider, &e))?;

    let status = res.status();
    let body = res.text().await.map_err(|e| transport(provider, &e))?;

    match status {
        s if s.is_success() => Ok(body),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
        s => Err(ProviderError::Transport(format!(
            "{provider} request failed with status {s}: {}",
            truncate_body(&body)
        ))),
    }
}

/// Decode a JSON body, reporting schema mismatches as malformed responses.
pub(crate) fn parse_json<T: DeserializeOwned>(
    provider: &str,
    body: &str,
) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| {
        ProviderError::MalformedResponse(format!(
            "failed to parse {provider} JSON ({e}): {}",
            truncate_body(body)
        ))
    })
}

fn transport(provider: &str, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transport(format!("{provider} request timed out"))
    } else {
        ProviderError::Transport(format!("{provider} request failed: {err}"))
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
