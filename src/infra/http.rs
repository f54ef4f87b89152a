//! Rate-limited JSON REST transport for provider backends.
//!
//! Every response refreshes the shared [`RateLimitState`] from its
//! `ratelimit-*` headers. `429 Too Many Requests` is never surfaced: the
//! request is retried once the rate-limit window resets.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::poller::RateLimitedPoller;
use crate::core::rate_limit::{RateLimitSnapshot, RateLimitState, MAX_BACKOFF};
use crate::core::{FleetError, FleetResult};

/// JSON client for a bearer-token authenticated REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    token: String,
    client: Client,
    rate_limit: Arc<RateLimitState>,
    poller: RateLimitedPoller,
}

impl RestClient {
    /// Client for `base_url` (e.g. `https://api.example.com/v2`).
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(base_url, token, Client::new())
    }

    /// Client using a preconfigured `reqwest::Client`.
    pub fn with_client(
        base_url: impl Into<String>,
        token: impl Into<String>,
        client: Client,
    ) -> Self {
        let rate_limit = RateLimitState::shared();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
            poller: RateLimitedPoller::new(Arc::clone(&rate_limit)),
            rate_limit,
        }
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Rate-limit budget refreshed by this client's responses.
    pub fn rate_limit(&self) -> Arc<RateLimitState> {
        Arc::clone(&self.rate_limit)
    }

    /// GET `path` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// `FleetError::Transport` on connection or decoding failures,
    /// `FleetError::Provider` on a non-success status.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> FleetResult<T> {
        let response = self.send(Method::GET, path, None::<&()>).await?;
        decode(response).await
    }

    /// Send `body` with `method` to `path` and decode the JSON response.
    ///
    /// # Errors
    ///
    /// See [`RestClient::get_json`].
    pub async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> FleetResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self.send(method, path, Some(body)).await?;
        decode(response).await
    }

    /// DELETE `path`, ignoring any response body.
    ///
    /// # Errors
    ///
    /// See [`RestClient::get_json`].
    pub async fn delete(&self, path: &str) -> FleetResult<()> {
        self.send(Method::DELETE, path, None::<&()>).await.map(|_| ())
    }

    /// GET every page of a listing, collecting the items under `key` that
    /// pass `filter`. Pages are followed through `links.pages.next`.
    ///
    /// # Errors
    ///
    /// See [`RestClient::get_json`]; a page without an array under `key` is a
    /// transport error.
    pub async fn get_paged<T, F>(&self, path: &str, key: &str, filter: F) -> FleetResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let mut items = Vec::new();
        let mut next = Some(path.to_owned());
        while let Some(page_path) = next.take() {
            let mut page: Value = self.get_json(&page_path).await?;
            let entries = match page.get_mut(key).map(Value::take) {
                Some(Value::Array(entries)) => entries,
                _ => {
                    return Err(FleetError::Transport(format!(
                        "response for {page_path} has no `{key}` array"
                    )))
                }
            };
            for entry in entries {
                let item: T = serde_json::from_value(entry)
                    .map_err(|e| FleetError::Transport(format!("invalid `{key}` entry: {e}")))?;
                if filter(&item) {
                    items.push(item);
                }
            }
            next = page
                .pointer("/links/pages/next")
                .and_then(Value::as_str)
                .map(str::to_owned);
        }
        Ok(items)
    }

    /// GET `path` until `is_ready` accepts the decoded body.
    ///
    /// # Errors
    ///
    /// `FleetError::Timeout` if it never does, or any request error.
    pub async fn poll_json<T, R>(
        &self,
        path: &str,
        is_ready: R,
        timeout: Duration,
    ) -> FleetResult<T>
    where
        T: DeserializeOwned,
        R: Fn(&T) -> bool,
    {
        self.poller
            .poll_with_timeout(|| self.get_json::<T>(path), is_ready, timeout)
            .await
    }

    fn url(&self, path: &str) -> String {
        let path = path.strip_prefix(self.base_url.as_str()).unwrap_or(path);
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    async fn send<B>(&self, method: Method, path: &str, body: Option<&B>) -> FleetResult<Response>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = self.url(path);
        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.token);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request
                .send()
                .await
                .map_err(|e| FleetError::Transport(format!("{method} {url}: {e}")))?;

            if let Some(snapshot) = parse_rate_limit(response.headers()) {
                self.rate_limit.observe(snapshot);
            }

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = self.rate_limit.time_to_reset().min(MAX_BACKOFF);
                warn!(
                    %method,
                    url = %url,
                    wait_secs = wait.as_secs_f64(),
                    "rate limited, retrying after reset"
                );
                tokio::time::sleep(wait).await;
                continue;
            }
            if !status.is_success() {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(FleetError::Provider(format!(
                    "{method} {url} returned {}: {text}",
                    status.as_u16()
                )));
            }
            debug!(%method, url = %url, status = status.as_u16(), "request completed");
            return Ok(response);
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> FleetResult<T> {
    response
        .json()
        .await
        .map_err(|e| FleetError::Transport(format!("failed to parse JSON response: {e}")))
}

/// Read `ratelimit-limit`, `ratelimit-remaining` and `ratelimit-reset`.
fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitSnapshot> {
    let read = |name: &str| -> Option<u64> {
        headers.get(name)?.to_str().ok()?.trim().parse().ok()
    };
    Some(RateLimitSnapshot {
        limit: read("ratelimit-limit")?,
        remaining: read("ratelimit-remaining")?,
        reset_epoch_secs: read("ratelimit-reset")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("ratelimit-limit", HeaderValue::from_static("5000"));
        headers.insert("ratelimit-remaining", HeaderValue::from_static("4321"));
        headers.insert("ratelimit-reset", HeaderValue::from_static("1700000000"));
        assert_eq!(
            parse_rate_limit(&headers),
            Some(RateLimitSnapshot {
                limit: 5000,
                remaining: 4321,
                reset_epoch_secs: 1_700_000_000,
            })
        );
    }

    #[test]
    fn test_parse_rate_limit_requires_all_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("ratelimit-limit", HeaderValue::from_static("5000"));
        assert!(parse_rate_limit(&headers).is_none());
    }

    #[test]
    fn test_url_resolution() {
        let client = RestClient::new("https://api.example.com/v2/", "token");
        assert_eq!(client.url("/droplets"), "https://api.example.com/v2/droplets");
        assert_eq!(client.url("images"), "https://api.example.com/v2/images");
        assert_eq!(
            client.url("https://api.example.com/v2/images?page=2"),
            "https://api.example.com/v2/images?page=2"
        );
    }
}
