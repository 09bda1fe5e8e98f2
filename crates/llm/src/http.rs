//! HTTP-served backend adapter.
//!
//! Serialises the prompt into an OpenAI-style chat-completions request body,
//! POSTs it to the configured endpoint, and extracts
//! `choices[0].message.content` from the JSON response. Every failure mode —
//! connection failure, non-2xx status, unparsable body, missing content
//! field — is classified into a [`BackendError`] before it reaches the
//! driver; a raw `reqwest` error never crosses the port boundary.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use pipeline::{Backend, BackendError, BackendName, InvocationOutput, InvocationRequest, ModelId};

/// A backend served over an HTTP chat-completions endpoint.
#[derive(Debug)]
pub struct HttpBackend {
    name: BackendName,
    endpoint: String,
    model: ModelId,
    timeout: Duration,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Creates an HTTP-served backend.
    ///
    /// An empty endpoint is a configuration error, caught here rather than
    /// at first invocation.
    pub fn new(
        name: BackendName,
        endpoint: impl Into<String>,
        model: ModelId,
        timeout: Duration,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<Self, BackendError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(BackendError::Config {
                message: format!("backend '{name}' has an empty endpoint URL"),
            });
        }
        Ok(Self {
            name,
            endpoint,
            model,
            timeout,
            temperature,
            max_tokens,
            client: reqwest::Client::new(),
        })
    }

    /// Builds the chat-completions request body.
    fn request_body(&self, request: &InvocationRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = request.system() {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt() }));

        json!({
            "model": self.model.as_str(),
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

/// Extracts `choices[0].message.content` from a chat-completions response.
///
/// An absent or null content field is a [`BackendError::Response`]; an empty
/// string is returned as-is (the driver decides what empty output means).
fn extract_content(body: &Value) -> Result<String, BackendError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BackendError::Response {
            status: None,
            reason: "response body has no choices[0].message.content".to_string(),
        })
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &BackendName {
        &self.name
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationOutput, BackendError> {
        let limit = self.timeout;
        let started = Instant::now();
        let body = self.request_body(request);

        debug!(backend = %self.name, endpoint = %self.endpoint, model = %self.model,
            timeout_secs = limit.as_secs(), "posting chat-completions request");

        let exchange = async {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|err| BackendError::Response {
                    status: None,
                    reason: format!("request to {} failed: {err}", self.endpoint),
                })?;

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(BackendError::Response {
                    status: Some(status.as_u16()),
                    reason: if detail.trim().is_empty() {
                        format!("server returned {status}")
                    } else {
                        format!("server returned {status}: {}", detail.trim())
                    },
                });
            }

            let parsed: Value =
                response
                    .json()
                    .await
                    .map_err(|err| BackendError::Response {
                        status: None,
                        reason: format!("unparsable response body: {err}"),
                    })?;
            extract_content(&parsed)
        };

        let text = match tokio::time::timeout(limit, exchange).await {
            Err(_) => {
                return Err(BackendError::Timeout {
                    limit_secs: limit.as_secs(),
                })
            }
            Ok(result) => result?,
        };

        Ok(InvocationOutput {
            text,
            elapsed: started.elapsed(),
        })
    }
}
