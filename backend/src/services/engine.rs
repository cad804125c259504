//! Automation engine REST client
//!
//! Thin contract over the external workflow-execution engine. The engine is
//! reached at a configured base URL via versioned REST paths and a static
//! API key header. Every response is checked for a JSON content type before
//! parsing: an HTML login page from a misrouted or unauthenticated call must
//! surface as a descriptive error, never as an empty success.

use async_trait::async_trait;
use mime::Mime;
use reqwest::{header, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::EngineConfig;
use crate::error::AppError;

/// Header carrying the static engine API key
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// How much of an unexpected response body is kept in error messages
const BODY_SNIPPET_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("engine returned status {status} for {url}: {snippet}")]
    Status {
        status: u16,
        url: String,
        snippet: String,
    },

    #[error("engine returned a non-JSON body ({content_type}) with status {status} for {url}: {snippet}")]
    UnexpectedContentType {
        status: u16,
        content_type: String,
        url: String,
        snippet: String,
    },

    #[error("response from {url} could not be decoded: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("engine holds no workflow '{id}'")]
    WorkflowNotFound { id: String },
}

impl EngineError {
    /// True when the engine definitively reported the workflow missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WorkflowNotFound { .. })
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Transport { url, source } => AppError::EngineError {
                status: None,
                url,
                message: source.to_string(),
            },
            EngineError::Status {
                status,
                url,
                snippet,
            } => AppError::EngineError {
                status: Some(status),
                url,
                message: snippet,
            },
            EngineError::UnexpectedContentType {
                status,
                content_type,
                url,
                snippet,
            } => AppError::EngineError {
                status: Some(status),
                url,
                message: format!("unexpected content type {}: {}", content_type, snippet),
            },
            EngineError::Decode { url, source } => AppError::EngineError {
                status: None,
                url,
                message: source.to_string(),
            },
            EngineError::WorkflowNotFound { id } => {
                AppError::NotFound(format!("Engine workflow '{}'", id))
            }
        }
    }
}

/// A node of an engine workflow definition. Parameters are engine-schema
/// JSON; fields this service does not interpret (positions, type versions)
/// ride along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A workflow definition as the engine reports it
#[derive(Debug, Clone, Deserialize)]
pub struct EngineWorkflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub nodes: Vec<EngineNode>,
    #[serde(default)]
    pub connections: Value,
    #[serde(default)]
    pub settings: Value,
    #[serde(default, rename = "staticData")]
    pub static_data: Value,
}

/// The body sent when creating or replacing a definition
#[derive(Debug, Clone, Serialize)]
pub struct EngineWorkflowSpec {
    pub name: String,
    pub active: bool,
    pub nodes: Vec<EngineNode>,
    pub connections: Value,
    pub settings: Value,
    #[serde(rename = "staticData")]
    pub static_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ExecutionResponse {
    #[serde(rename = "executionId")]
    execution_id: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AutomationEngine: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<EngineWorkflow, EngineError>;
    async fn create_workflow(&self, spec: &EngineWorkflowSpec)
        -> Result<EngineWorkflow, EngineError>;
    async fn update_workflow(
        &self,
        id: &str,
        spec: &EngineWorkflowSpec,
    ) -> Result<EngineWorkflow, EngineError>;
    /// Patch only the activation flag of a definition
    async fn set_active(&self, id: &str, active: bool) -> Result<(), EngineError>;
    async fn delete_workflow(&self, id: &str) -> Result<(), EngineError>;
    /// Run a definition with the given payload; returns the execution id
    async fn execute_workflow(&self, id: &str, payload: &Value) -> Result<String, EngineError>;
    async fn list_tags(&self) -> Result<Vec<EngineTag>, EngineError>;
    async fn create_tag(&self, name: &str) -> Result<EngineTag, EngineError>;
    async fn set_workflow_tags(&self, id: &str, tag_ids: &[String]) -> Result<(), EngineError>;
}

pub struct HttpEngineClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpEngineClient {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        // Fail fast on a malformed base URL instead of on the first call
        let parsed = Url::parse(&config.base_url)?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Response, EngineError> {
        request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|source| EngineError::Transport {
                url: url.to_string(),
                source,
            })
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Parse an engine response, enforcing a success status and a JSON body.
async fn read_json(url: &str, response: Response) -> Result<Value, EngineError> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let body = response
        .text()
        .await
        .map_err(|source| EngineError::Transport {
            url: url.to_string(),
            source,
        })?;

    if !status.is_success() {
        return Err(EngineError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            snippet: snippet(&body),
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    let is_json = content_type
        .parse::<Mime>()
        .map(|m| m.type_() == mime::APPLICATION && m.subtype() == mime::JSON)
        .unwrap_or(false);

    if !is_json {
        return Err(EngineError::UnexpectedContentType {
            status: status.as_u16(),
            content_type,
            url: url.to_string(),
            snippet: snippet(&body),
        });
    }

    serde_json::from_str(&body).map_err(|source| EngineError::Decode {
        url: url.to_string(),
        source,
    })
}

fn decode<T: serde::de::DeserializeOwned>(url: &str, value: Value) -> Result<T, EngineError> {
    serde_json::from_value(value).map_err(|source| EngineError::Decode {
        url: url.to_string(),
        source,
    })
}

#[async_trait]
impl AutomationEngine for HttpEngineClient {
    async fn get_workflow(&self, id: &str) -> Result<EngineWorkflow, EngineError> {
        let url = self.endpoint(&format!("workflows/{}", id));
        let response = self.send(self.client.get(&url), &url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::WorkflowNotFound { id: id.to_string() });
        }

        let value = read_json(&url, response).await?;
        decode(&url, value)
    }

    async fn create_workflow(
        &self,
        spec: &EngineWorkflowSpec,
    ) -> Result<EngineWorkflow, EngineError> {
        let url = self.endpoint("workflows");
        let response = self.send(self.client.post(&url).json(spec), &url).await?;
        let value = read_json(&url, response).await?;
        decode(&url, value)
    }

    async fn update_workflow(
        &self,
        id: &str,
        spec: &EngineWorkflowSpec,
    ) -> Result<EngineWorkflow, EngineError> {
        let url = self.endpoint(&format!("workflows/{}", id));
        let response = self.send(self.client.put(&url).json(spec), &url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::WorkflowNotFound { id: id.to_string() });
        }

        let value = read_json(&url, response).await?;
        decode(&url, value)
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<(), EngineError> {
        let url = self.endpoint(&format!("workflows/{}", id));
        let body = serde_json::json!({ "active": active });
        let response = self.send(self.client.patch(&url).json(&body), &url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::WorkflowNotFound { id: id.to_string() });
        }

        read_json(&url, response).await.map(|_| ())
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), EngineError> {
        let url = self.endpoint(&format!("workflows/{}", id));
        let response = self.send(self.client.delete(&url), &url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::WorkflowNotFound { id: id.to_string() });
        }

        read_json(&url, response).await.map(|_| ())
    }

    async fn execute_workflow(&self, id: &str, payload: &Value) -> Result<String, EngineError> {
        let url = self.endpoint(&format!("workflows/{}/execute", id));
        let response = self.send(self.client.post(&url).json(payload), &url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::WorkflowNotFound { id: id.to_string() });
        }

        let value = read_json(&url, response).await?;
        let execution: ExecutionResponse = decode(&url, value)?;
        Ok(execution.execution_id)
    }

    async fn list_tags(&self) -> Result<Vec<EngineTag>, EngineError> {
        let url = self.endpoint("tags");
        let response = self.send(self.client.get(&url), &url).await?;
        let value = read_json(&url, response).await?;
        decode(&url, value)
    }

    async fn create_tag(&self, name: &str) -> Result<EngineTag, EngineError> {
        let url = self.endpoint("tags");
        let body = serde_json::json!({ "name": name });
        let response = self.send(self.client.post(&url).json(&body), &url).await?;
        let value = read_json(&url, response).await?;
        decode(&url, value)
    }

    async fn set_workflow_tags(&self, id: &str, tag_ids: &[String]) -> Result<(), EngineError> {
        let url = self.endpoint(&format!("workflows/{}/tags", id));
        let body: Vec<Value> = tag_ids
            .iter()
            .map(|tag_id| serde_json::json!({ "id": tag_id }))
            .collect();
        let response = self.send(self.client.put(&url).json(&body), &url).await?;
        read_json(&url, response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpEngineClient {
        HttpEngineClient::new(&EngineConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
        })
        .unwrap()
    }

    fn workflow_body() -> Value {
        json!({
            "id": "wf-1",
            "name": "Lead sync",
            "active": true,
            "nodes": [
                {"name": "Fetch", "type": "flowgrid.httpRequest", "parameters": {"url": "https://example.com"}}
            ],
            "connections": {},
            "settings": {"timezone": "UTC"},
            "staticData": {}
        })
    }

    #[tokio::test]
    async fn get_workflow_sends_api_key_and_parses_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/wf-1"))
            .and(header(API_KEY_HEADER, "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(workflow_body()))
            .expect(1)
            .mount(&server)
            .await;

        let workflow = client_for(&server).get_workflow("wf-1").await.unwrap();
        assert_eq!(workflow.id, "wf-1");
        assert!(workflow.active);
        assert_eq!(workflow.nodes.len(), 1);
        assert_eq!(workflow.nodes[0].kind, "flowgrid.httpRequest");
    }

    #[tokio::test]
    async fn html_body_is_reported_with_status_url_and_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/wf-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>Sign in to continue</body></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).get_workflow("wf-1").await.unwrap_err();
        match err {
            EngineError::UnexpectedContentType {
                status,
                content_type,
                url,
                snippet,
            } => {
                assert_eq!(status, 200);
                assert!(content_type.starts_with("text/html"));
                assert!(url.contains("/api/v1/workflows/wf-1"));
                assert!(snippet.contains("Sign in"));
            }
            other => panic!("expected UnexpectedContentType, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/workflows"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let spec = EngineWorkflowSpec {
            name: "x".into(),
            active: false,
            nodes: vec![],
            connections: json!({}),
            settings: json!({}),
            static_data: json!({}),
        };
        let err = client_for(&server).create_workflow(&spec).await.unwrap_err();
        match err {
            EngineError::Status {
                status, snippet, ..
            } => {
                assert_eq!(status, 500);
                assert_eq!(snippet, "boom");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_workflow_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
            .mount(&server)
            .await;

        let err = client_for(&server).get_workflow("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn set_active_patches_the_activation_flag() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/workflows/wf-1"))
            .and(body_json(json!({"active": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(workflow_body()))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).set_active("wf-1", true).await.unwrap();
    }

    #[tokio::test]
    async fn execute_returns_execution_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/workflows/wf-1/execute"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"executionId": "exec-42"})),
            )
            .mount(&server)
            .await;

        let execution_id = client_for(&server)
            .execute_workflow("wf-1", &json!({"lead": "l-1"}))
            .await
            .unwrap();
        assert_eq!(execution_id, "exec-42");
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(500);
        let s = snippet(&long);
        assert!(s.len() <= BODY_SNIPPET_LEN + 3);
        assert!(s.ends_with("..."));
    }
}
