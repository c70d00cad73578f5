//! HTTP forwarder: JSON body per `forward` call, success = 2xx. Non-2xx
//! 4xx responses are non-transient (short-circuit); 5xx and connection
//! errors are transient (retried).

use std::time::Duration;

use gateway_protocol::{AuthConfig, AuthType};
use reqwest::Client;

use crate::retry::forward_with_retry;
use crate::{ForwardOutcome, ForwardResult, Forwarder, ForwarderError, ForwarderStats, ForwarderStatsSnapshot, RetryPolicy};

#[derive(Debug, Clone)]
pub struct HttpForwarderConfig {
    pub url: String,
    pub method: reqwest::Method,
    pub timeout: Duration,
    pub verify_ssl: bool,
    pub auth: Option<AuthConfig>,
    pub retry_policy: RetryPolicy,
}

pub struct HttpForwarder {
    client: Client,
    config: HttpForwarderConfig,
    stats: ForwarderStats,
}

impl HttpForwarder {
    pub fn new(config: HttpForwarderConfig) -> Result<Self, ForwarderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| ForwarderError::Config(e.to_string()))?;
        Ok(HttpForwarder { client, config, stats: ForwarderStats::default() })
    }

    fn apply_auth(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(auth) = &self.config.auth else { return builder };
        match auth.auth_type {
            AuthType::None => {}
            AuthType::Basic => {
                builder = builder.basic_auth(auth.username.clone().unwrap_or_default(), auth.password.clone());
            }
            AuthType::Bearer => {
                if let Some(token) = &auth.token {
                    builder = builder.bearer_auth(token);
                }
            }
            AuthType::ApiKey => {
                let header = auth.api_key_header.clone().unwrap_or_else(|| "X-API-Key".to_string());
                if let Some(key) = &auth.api_key {
                    builder = builder.header(header, key);
                }
            }
            AuthType::Custom => {
                for (k, v) in &auth.custom_headers {
                    builder = builder.header(k, v);
                }
            }
        }
        builder
    }
}

#[async_trait::async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, payload: &[u8]) -> ForwardResult {
        let body = payload.to_vec();
        let result = forward_with_retry(&self.config.retry_policy, |_attempt| {
            let body = body.clone();
            async move {
                let builder = self.client.request(self.config.method.clone(), &self.config.url).header("Content-Type", "application/json").body(body);
                let builder = self.apply_auth(builder);
                match builder.send().await {
                    Ok(response) => {
                        let status = response.status();
                        if status.is_success() {
                            Ok(())
                        } else if status.is_server_error() {
                            Err(ForwardOutcome::transient(format!("server error: {status}")))
                        } else {
                            Err(ForwardOutcome::permanent(format!("non-2xx response: {status}"), Some(status.as_u16())))
                        }
                    }
                    Err(e) if e.is_timeout() => Err(ForwardOutcome::timeout(e.to_string())),
                    Err(e) if e.is_connect() => Err(ForwardOutcome::transient(e.to_string())),
                    Err(e) => Err(ForwardOutcome::permanent(e.to_string(), None)),
                }
            }
        })
        .await;
        self.stats.record(&result);
        result
    }

    async fn close(&self) {}

    fn stats(&self) -> ForwarderStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_url_scheme_gracefully() {
        let forwarder = HttpForwarder::new(HttpForwarderConfig {
            url: "not a url".to_string(),
            method: reqwest::Method::POST,
            timeout: Duration::from_millis(200),
            verify_ssl: true,
            auth: None,
            retry_policy: RetryPolicy::none(),
        })
        .unwrap();
        let result = forwarder.forward(b"{}").await;
        assert_eq!(result.status, crate::ForwardStatus::Failed);
    }
}
