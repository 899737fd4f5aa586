use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use flowdeck_core::config::{AppConfig, BackendConfig, RetryConfig};
use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::traits::WorkflowApi;
use flowdeck_core::types::*;

use crate::retry::with_retry;

/// REST client for the agent backend.
///
/// Writes (upsert, execute, delete, template instantiation) are sent once.
/// Reads retry transient failures with backoff.
pub struct BackendClient {
    http: reqwest::Client,
    api_url: String,
    api_base: String,
    retry: RetryConfig,
}

impl BackendClient {
    pub fn new(backend: &BackendConfig, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(backend.request_timeout_secs))
            .build()
            .map_err(|e| FlowdeckError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_url: backend.api_url.trim_end_matches('/').to_string(),
            api_base: backend.api_base(),
            retry,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(&config.backend, config.retry.clone())
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| FlowdeckError::Network(format!("Invalid response body: {}", e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        with_retry(&self.retry, path, || self.send(self.http.get(&url))).await
    }
}

fn transport_error(e: reqwest::Error) -> FlowdeckError {
    if e.is_timeout() {
        FlowdeckError::Network(format!("Request timed out: {}", e))
    } else if e.is_connect() {
        FlowdeckError::Network(format!("Connection failed: {}", e))
    } else {
        FlowdeckError::Network(e.to_string())
    }
}

/// Turn a non-2xx response into `Backend`, preferring the body's
/// `detail` or `message` field.
async fn backend_error(response: reqwest::Response) -> FlowdeckError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    FlowdeckError::Backend {
        status: status.as_u16(),
        message: error_message(status, &body),
    }
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let from_body = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let field = v.get("detail").or_else(|| v.get("message"))?;
            Some(match field.as_str() {
                Some(s) => s.to_string(),
                None => field.to_string(),
            })
        });
    match from_body {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown")
        ),
    }
}

#[derive(Deserialize)]
struct AgentsResponse {
    #[serde(default)]
    agents: serde_json::Value,
}

#[derive(Deserialize)]
struct WorkflowsResponse {
    #[serde(default)]
    workflows: Vec<WorkflowSummary>,
}

#[derive(Deserialize)]
struct WorkflowResponse {
    workflow: WorkflowDocument,
}

#[derive(Deserialize)]
struct TemplatesResponse {
    #[serde(default)]
    templates: serde_json::Value,
}

/// The catalog arrives either keyed by agent id or as a plain list.
/// Keyed entries take their id from the key when missing.
fn parse_agents(agents: serde_json::Value) -> Vec<AgentDescriptor> {
    let entries: Vec<(Option<String>, serde_json::Value)> = match agents {
        serde_json::Value::Object(map) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
        serde_json::Value::Array(list) => list.into_iter().map(|v| (None, v)).collect(),
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<AgentDescriptor>(value) {
            Ok(agent) => {
                let key = key.unwrap_or_else(|| agent.id.clone());
                Some(agent.normalized(&key))
            }
            Err(e) => {
                warn!(agent = ?key, error = %e, "Skipping malformed catalog entry");
                None
            }
        })
        .filter(|agent| !agent.id.is_empty())
        .collect()
}

fn parse_templates(templates: serde_json::Value) -> Vec<TemplateDescriptor> {
    let entries: Vec<(Option<String>, serde_json::Value)> = match templates {
        serde_json::Value::Object(map) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
        serde_json::Value::Array(list) => list.into_iter().map(|v| (None, v)).collect(),
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let mut template: TemplateDescriptor = serde_json::from_value(value).ok()?;
            if template.id.is_empty() {
                template.id = key?;
            }
            Some(template)
        })
        .collect()
}

impl WorkflowApi for BackendClient {
    fn upsert_workflow(&self, doc: &WorkflowDocument) -> BoxFuture<'_, Result<serde_json::Value>> {
        let doc = doc.clone();
        Box::pin(async move {
            debug!(workflow_id = %doc.id, "Upserting workflow");
            self.send(self.http.post(self.url("/workflows")).json(&doc))
                .await
        })
    }

    fn execute_workflow(
        &self,
        workflow_id: &str,
        initial_data: serde_json::Value,
    ) -> BoxFuture<'_, Result<ExecutionAck>> {
        let path = format!("/workflows/{}/execute", urlencoding::encode(workflow_id));
        Box::pin(async move {
            let body = serde_json::json!({ "initial_data": initial_data });
            self.send(self.http.post(self.url(&path)).json(&body)).await
        })
    }

    fn available_agents(&self) -> BoxFuture<'_, Result<Vec<AgentDescriptor>>> {
        Box::pin(async move {
            let response: AgentsResponse = self.get("/agents/available").await?;
            Ok(parse_agents(response.agents))
        })
    }

    fn list_workflows(&self) -> BoxFuture<'_, Result<Vec<WorkflowSummary>>> {
        Box::pin(async move {
            let response: WorkflowsResponse = self.get("/workflows").await?;
            Ok(response.workflows)
        })
    }

    fn get_workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<WorkflowDocument>> {
        let path = format!("/workflows/{}", urlencoding::encode(workflow_id));
        Box::pin(async move {
            let response: WorkflowResponse = self.get(&path).await?;
            Ok(response.workflow)
        })
    }

    fn delete_workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<()>> {
        let path = format!("/workflows/{}", urlencoding::encode(workflow_id));
        Box::pin(async move {
            let _: serde_json::Value = self.send(self.http.delete(self.url(&path))).await?;
            Ok(())
        })
    }

    fn list_templates(&self) -> BoxFuture<'_, Result<Vec<TemplateDescriptor>>> {
        Box::pin(async move {
            let response: TemplatesResponse = self.get("/workflows/templates").await?;
            Ok(parse_templates(response.templates))
        })
    }

    fn create_from_template(
        &self,
        template_id: &str,
        customizations: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let path = format!(
            "/workflows/templates/{}/create",
            urlencoding::encode(template_id)
        );
        Box::pin(async move {
            self.send(self.http.post(self.url(&path)).json(&customizations))
                .await
        })
    }

    fn health(&self) -> BoxFuture<'_, HealthReport> {
        Box::pin(async move {
            let url = format!("{}/health", self.api_url);
            let timestamp = chrono::Utc::now();
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body: serde_json::Value = response.json().await.unwrap_or_default();
                    HealthReport {
                        status: HealthStatus::Healthy,
                        workflow_engine: Some(
                            body["workflow_engine"]
                                .as_str()
                                .unwrap_or("unknown")
                                .to_string(),
                        ),
                        total_workflows: body["total_workflows"].as_u64().unwrap_or(0),
                        error: None,
                        timestamp,
                    }
                }
                Ok(response) => HealthReport {
                    status: HealthStatus::Unhealthy,
                    workflow_engine: None,
                    total_workflows: 0,
                    error: Some(format!("HTTP {}", response.status().as_u16())),
                    timestamp,
                },
                Err(e) => HealthReport {
                    status: HealthStatus::Unreachable,
                    workflow_engine: None,
                    total_workflows: 0,
                    error: Some(e.to_string()),
                    timestamp,
                },
            }
        })
    }
}
