// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! A2A Client
//!
//! Sends JSON-RPC `message/send` requests to other agents.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** [`HttpA2aTransport`] performs one POST with reqwest;
//!   [`A2aClient`] wraps any [`A2aTransport`] in the retry policy.
//!
//! Retries cover connection failures, timeouts, and the configured status
//! codes. The retry budget also caps each attempt, so a request that hangs
//! past `max_elapsed_time` is abandoned even if the HTTP timeout is longer. A JSON-RPC error in a 2xx body is final. Retrying is not idempotent:
//! a remote agent that processed a request but failed to answer may see it
//! again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::a2a::{
    A2aHttpResponse, A2aMessage, A2aTransport, A2aTransportError, JsonRpcRequest, JsonRpcResponse,
};
use crate::infrastructure::retry::{with_retry, RetryClassification, RetryPolicy, RetryableError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum A2aClientError {
    #[error(transparent)]
    Transport(#[from] A2aTransportError),

    #[error("remote agent answered HTTP {status}")]
    RetryableStatus { status: u16 },

    #[error("remote agent answered HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl RetryableError for A2aClientError {
    fn classify(&self) -> RetryClassification {
        match self {
            Self::Transport(e) if e.is_retryable() => RetryClassification::Retry,
            Self::RetryableStatus { .. } => RetryClassification::Retry,
            _ => RetryClassification::NoRetry,
        }
    }

    fn budget_exhausted(elapsed: Duration) -> Self {
        Self::Transport(A2aTransportError::Timeout(format!(
            "no response after {:?}, retry budget exhausted",
            elapsed
        )))
    }
}

/// reqwest-backed transport. One POST per call; no retries here.
pub struct HttpA2aTransport {
    client: reqwest::Client,
}

impl HttpA2aTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, A2aTransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| A2aTransportError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> A2aTransportError {
    if err.is_timeout() {
        A2aTransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        A2aTransportError::Connect(err.to_string())
    } else {
        A2aTransportError::Request(err.to_string())
    }
}

#[async_trait]
impl A2aTransport for HttpA2aTransport {
    async fn post(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        request: &JsonRpcRequest,
    ) -> Result<A2aHttpResponse, A2aTransportError> {
        let mut builder = self.client.post(url).json(request);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(A2aHttpResponse { status, body })
    }
}

/// Retrying JSON-RPC client over any [`A2aTransport`].
#[derive(Clone)]
pub struct A2aClient {
    transport: Arc<dyn A2aTransport>,
    policy: RetryPolicy,
}

impl A2aClient {
    pub fn new(transport: Arc<dyn A2aTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends `message` with `message/send` and returns the successful response.
    pub async fn send_message(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        message: A2aMessage,
    ) -> Result<JsonRpcResponse, A2aClientError> {
        let request = JsonRpcRequest::message_send(message.message_id.clone(), message);

        let response = with_retry(&self.policy, "a2a message/send", || self.attempt(url, headers, &request)).await?;

        if let Some(error) = response.error {
            return Err(A2aClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response)
    }

    async fn attempt(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        request: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, A2aClientError> {
        let raw = self.transport.post(url, headers, request).await?;
        debug!(url = %url, status = raw.status, "a2a response received");

        if !(200..300).contains(&raw.status) {
            return if self.policy.is_retryable_status(raw.status) {
                Err(A2aClientError::RetryableStatus { status: raw.status })
            } else {
                Err(A2aClientError::Status {
                    status: raw.status,
                    body: raw.body,
                })
            };
        }

        serde_json::from_str::<JsonRpcResponse>(&raw.body).map_err(|e| A2aClientError::InvalidResponse(e.to_string()))
    }
}
