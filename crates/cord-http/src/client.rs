//! Rate-limited REST client

use crate::headers::{RateLimitBody, RateLimitHeaders};
use crate::metadata::{GatewayBotInfo, GatewayMetadata};
use crate::route::Route;
use async_trait::async_trait;
use cord_common::{Backoff, ClientConfig, ClientError, ClientResult, RestConfig};
use cord_core::Snowflake;
use cord_ratelimit::RateLimiter;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Wait applied to a 429 that carries neither a body nor a `Retry-After` header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// REST client sharing a [`RateLimiter`] with the gateway
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: RestConfig,
    limiter: Arc<RateLimiter>,
    backoff: Backoff,
}

impl RestClient {
    /// Build a client authenticated with the configured bot token
    pub fn new(config: &ClientConfig, limiter: Arc<RateLimiter>) -> ClientResult<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bot {}", config.token)).map_err(|_| {
            ClientError::configuration("bot token contains invalid header characters")
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("DiscordBot (cord, ", env!("CARGO_PKG_VERSION"), ")")),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.rest.request_timeout())
            .build()
            .map_err(ClientError::internal)?;

        Ok(Self {
            http,
            config: config.rest.clone(),
            limiter,
            backoff: Backoff::http(),
        })
    }

    /// Replace the backoff used for 5xx and connection retries
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Send a request and decode the JSON response
    pub async fn request<T: DeserializeOwned>(
        &self,
        route: &Route,
        body: Option<&Value>,
    ) -> ClientResult<T> {
        let response = self.execute(route, body).await?;
        let bytes = response.bytes().await.map_err(ClientError::network)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Send a request whose response has no body of interest (204 and the like)
    pub async fn request_empty(&self, route: &Route, body: Option<&Value>) -> ClientResult<()> {
        self.execute(route, body).await.map(drop)
    }

    /// Run the request loop: wait for every bucket, send, feed the headers back, retry 429s and
    /// server errors up to `max_retries` times.
    async fn execute(&self, route: &Route, body: Option<&Value>) -> ClientResult<Response> {
        let scope_key = route.scope_key();
        let scope_keys = route.scope_keys();
        let keys: Vec<&str> = scope_keys.iter().map(String::as_str).collect();
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), route.path());
        let max_retries = self.config.max_retries;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.limiter.until_ready(&keys, 1).await;

            let mut request = self.http.request(route.method().clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    self.limiter.release(&keys, 1);
                    if !(err.is_connect() || err.is_timeout()) || attempt > max_retries {
                        return Err(ClientError::network(err));
                    }
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        route = %scope_key,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = response.status();
            let headers = RateLimitHeaders::parse(response.headers());
            if let Some(update) = headers.bucket_update() {
                self.limiter.update(&scope_key, &update);
            }
            // Scopes the headers did not cover keep no reservation for this request
            self.limiter.release(&keys, 1);

            if status == StatusCode::TOO_MANY_REQUESTS {
                let body: Option<RateLimitBody> = response.json().await.ok();
                let retry_after = body
                    .as_ref()
                    .and_then(RateLimitBody::retry_after)
                    .or(headers.retry_after)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                let global = headers.is_global() || body.as_ref().is_some_and(|b| b.global);

                self.limiter.rate_limited(&scope_key, retry_after, global);
                if attempt > max_retries {
                    return Err(ClientError::RateLimited {
                        retry_after,
                        global,
                    });
                }
                tracing::debug!(
                    route = %scope_key,
                    attempt,
                    retry_after_ms = retry_after.as_millis(),
                    global,
                    "Rate limited, retrying"
                );
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(ClientError::Authentication(
                    "REST API rejected the bot token".to_string(),
                ));
            }

            if status.is_server_error() && attempt <= max_retries {
                let delay = headers
                    .retry_after
                    .unwrap_or_else(|| self.backoff.delay(attempt));
                tracing::warn!(
                    route = %scope_key,
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Server error, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(ClientError::Http {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response);
        }
    }

    /// Gateway URL, recommended shard count and session start limit
    pub async fn gateway_bot(&self) -> ClientResult<GatewayBotInfo> {
        self.request(&Route::gateway_bot(), None).await
    }

    /// Post a plain text message to a channel
    pub async fn create_message(
        &self,
        channel_id: Snowflake,
        content: &str,
    ) -> ClientResult<Value> {
        let body = json!({ "content": content });
        self.request(&Route::create_message(channel_id), Some(&body))
            .await
    }

    /// React to a message. `emoji` is either a unicode emoji or `name:id`.
    pub async fn create_reaction(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &str,
    ) -> ClientResult<()> {
        self.request_empty(&Route::create_reaction(channel_id, message_id, emoji), None)
            .await
    }
}

#[async_trait]
impl GatewayMetadata for RestClient {
    async fn gateway_bot(&self) -> ClientResult<GatewayBotInfo> {
        RestClient::gateway_bot(self).await
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.config.base_url)
            .field("max_retries", &self.config.max_retries)
            .finish_non_exhaustive()
    }
}
