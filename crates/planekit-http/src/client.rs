//! REST control-plane client
//!
//! Speaks the common management-API dialect: one URL per resource,
//! PUT/GET/DELETE verbs, and `202 Accepted` plus an `operation-location`
//! header for actions that complete asynchronously. Status documents are
//! polled as JSON (`{"status": "InProgress" | "Succeeded" | ...}`) with
//! `Retry-After` hints honored.

use crate::error::ConfigError;
use async_trait::async_trait;
use planekit_core::{
    ErrorDetail, OperationHandle, OperationStatus, ProvisionError, ResourceClient, ResourceOutput,
    StepAction, SubmitOutcome,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_API_VERSION: &str = "2024-06-01";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for the control plane.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub endpoint: String,
    pub subscription: String,
    pub api_token: String,
    pub api_version: String,
}

impl ControlPlaneConfig {
    /// Read the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = require("PLANEKIT_ENDPOINT")?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidEndpoint(endpoint));
        }
        let subscription = require("PLANEKIT_SUBSCRIPTION")?;
        let api_token = require("PLANEKIT_API_TOKEN")?;
        let api_version = std::env::var("PLANEKIT_API_VERSION")
            .unwrap_or_else(|_| DEFAULT_API_VERSION.to_string());

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            subscription,
            api_token,
            api_version,
        })
    }
}

fn require(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

/// [`ResourceClient`] backed by a REST control plane.
///
/// Every request carries a connect and an overall timeout, so a hung
/// connection surfaces as a retryable `Transport` error instead of stalling
/// the poll loop.
pub struct HttpResourceClient {
    client: reqwest::Client,
    config: ControlPlaneConfig,
}

impl HttpResourceClient {
    pub fn new(config: ControlPlaneConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn resource_url(&self, kind: &str, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/providers/{}/{}?api-version={}",
            self.config.endpoint, self.config.subscription, kind, name, self.config.api_version
        )
    }

    async fn rejection(response: Response) -> ProvisionError {
        let status = response.status().as_u16();
        let detail = match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => envelope.error.into_detail(Some(status)),
            Err(_) => {
                ErrorDetail::new("Unknown", "control plane returned an error").with_status(status)
            }
        };
        ProvisionError::RemoteRejected(detail)
    }
}

fn transport(err: reqwest::Error) -> ProvisionError {
    ProvisionError::Transport(err.to_string())
}

/// Parse a `Retry-After` header (delta-seconds form).
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Extract the polling locator for an accepted operation.
fn operation_locator(headers: &HeaderMap) -> Option<String> {
    for header in ["operation-location", "location"] {
        if let Some(value) = headers.get(header) {
            if let Ok(text) = value.to_str() {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn output_from_body(body: serde_json::Value) -> ResourceOutput {
    let resource_id = body
        .get("id")
        .and_then(|id| id.as_str())
        .map(str::to_string);
    ResourceOutput {
        resource_id,
        properties: body,
    }
}

#[derive(Deserialize, Default)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl ErrorBody {
    fn into_detail(self, status: Option<u16>) -> ErrorDetail {
        let code = if self.code.is_empty() {
            "Unknown".to_string()
        } else {
            self.code
        };
        let mut detail = ErrorDetail::new(code, self.message);
        detail.status = status;
        detail
    }
}

#[derive(Deserialize)]
struct StatusDocument {
    #[serde(default)]
    status: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    properties: serde_json::Value,
}

fn status_from_document(
    doc: StatusDocument,
    retry_after: Option<Duration>,
) -> Result<OperationStatus, ProvisionError> {
    match doc.status.as_str() {
        "InProgress" | "Running" | "Accepted" | "Creating" | "Deleting" => {
            Ok(OperationStatus::Running { retry_after })
        }
        "Succeeded" => Ok(OperationStatus::Succeeded(ResourceOutput {
            resource_id: doc.id,
            properties: doc.properties,
        })),
        "Failed" => Ok(OperationStatus::Failed(
            doc.error.unwrap_or_default().into_detail(None),
        )),
        "Canceled" | "Cancelled" => Ok(OperationStatus::Canceled),
        other => Err(ProvisionError::RemoteRejected(ErrorDetail::new(
            "MalformedStatus",
            format!("unrecognized operation status '{other}'"),
        ))),
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn submit(
        &self,
        action: StepAction,
        kind: &str,
        name: &str,
        body: &serde_json::Value,
    ) -> planekit_core::Result<SubmitOutcome> {
        let url = self.resource_url(kind, name);
        let request = match action {
            StepAction::CreateOrUpdate => self.client.put(&url).json(body),
            StepAction::Delete => self.client.delete(&url),
            StepAction::Read => self.client.get(&url),
        };
        let response = request
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();

        let accepted = status == StatusCode::ACCEPTED
            || (status == StatusCode::CREATED && operation_locator(response.headers()).is_some());
        if accepted {
            let retry_after = parse_retry_after(response.headers());
            let locator = operation_locator(response.headers()).ok_or_else(|| {
                ProvisionError::RemoteRejected(
                    ErrorDetail::new(
                        "MissingOperationLocator",
                        "accepted response carried no operation locator",
                    )
                    .with_status(status.as_u16()),
                )
            })?;
            tracing::debug!(%kind, %name, %locator, "accepted for asynchronous completion");
            let mut handle = OperationHandle::new(locator);
            if let Some(interval) = retry_after {
                handle = handle.with_poll_interval(interval);
            }
            return Ok(SubmitOutcome::Accepted(handle));
        }

        if status.is_success() {
            if status == StatusCode::NO_CONTENT || action == StepAction::Delete {
                return Ok(SubmitOutcome::Complete(ResourceOutput::absent()));
            }
            let body: serde_json::Value = response.json().await.map_err(transport)?;
            return Ok(SubmitOutcome::Complete(output_from_body(body)));
        }

        if status.is_server_error() {
            return Err(ProvisionError::Transport(format!(
                "control plane returned {status}"
            )));
        }
        Err(Self::rejection(response).await)
    }

    async fn query_status(
        &self,
        handle: &OperationHandle,
    ) -> planekit_core::Result<OperationStatus> {
        let response = self
            .client
            .get(&handle.locator)
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();

        if status.is_server_error() {
            return Err(ProvisionError::Transport(format!(
                "control plane returned {status}"
            )));
        }
        let retry_after = parse_retry_after(response.headers());
        // Some control planes answer 202 with an empty body while in flight.
        if status == StatusCode::ACCEPTED {
            return Ok(OperationStatus::Running { retry_after });
        }
        if !status.is_success() {
            return Err(Self::rejection(response).await);
        }

        let doc: StatusDocument = response.json().await.map_err(transport)?;
        status_from_document(doc, retry_after)
    }

    async fn fetch(
        &self,
        kind: &str,
        name: &str,
    ) -> planekit_core::Result<Option<ResourceOutput>> {
        let response = self
            .client
            .get(&self.resource_url(kind, name))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: serde_json::Value = response.json().await.map_err(transport)?;
                Ok(Some(output_from_body(body)))
            }
            status if status.is_server_error() => Err(ProvisionError::Transport(format!(
                "control plane returned {status}"
            ))),
            _ => Err(Self::rejection(response).await),
        }
    }
}
