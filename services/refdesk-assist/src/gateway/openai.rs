//! OpenAI Assistants API gateway.
//!
//! Files back the document, vector stores are the derived search index,
//! threads are the persistent conversation, and assistants are the
//! reusable profile.

use super::{
    AssistantProfile, Document, GatewayError, MessageContent, ProfileSpec, ProviderGateway,
    ResourceKind, RunStatus,
};
use anyhow::Context;
use async_trait::async_trait;
use refdesk_common::config::ProviderConfig;
use refdesk_common::util::truncate_with_ellipsis;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Gateway speaking the OpenAI Assistants v2 HTTP API.
pub struct OpenAiGateway {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiGateway {
    /// Create with a custom base URL (proxies, compatible APIs, tests).
    ///
    /// Fails when the key cannot be carried in an HTTP header or the
    /// client cannot be built.
    pub fn with_base_url(
        api_key: &str,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .context("provider api key is not a valid HTTP header value")?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("assistants=v2"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build provider HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build from service configuration. Requires an API key.
    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow::anyhow!("provider.api_key (or OPENAI_API_KEY) is not set"))?;

        Self::with_base_url(api_key, config.base_url.clone(), config.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        target: &str,
    ) -> Result<T, GatewayError> {
        let response = Self::execute(request, target).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("{}: {}", target, e)))
    }

    async fn execute(
        request: RequestBuilder,
        target: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{}: {}", target, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(target.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: provider_error_message(&body),
            });
        }

        Ok(response)
    }

    fn resource_path(kind: ResourceKind, id: &str) -> String {
        match kind {
            ResourceKind::File => format!("files/{}", id),
            ResourceKind::Index => format!("vector_stores/{}", id),
            ResourceKind::Session => format!("threads/{}", id),
        }
    }
}

/// Pull `error.message` out of a provider error body, falling back to a
/// truncated copy of the raw text.
fn provider_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| truncate_with_ellipsis(body.trim(), 200))
}

fn map_run_status(run: RunObject) -> RunStatus {
    let last_error = run.last_error.map(|e| e.message);
    match run.status.as_str() {
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed { reason: last_error },
        "cancelled" | "expired" | "incomplete" => RunStatus::Failed {
            reason: Some(last_error.unwrap_or_else(|| format!("run {}", run.status))),
        },
        "requires_action" => RunStatus::Failed {
            reason: Some("run requires tool outputs, which this service does not provide".into()),
        },
        _ => RunStatus::Pending(run.status),
    }
}

#[async_trait]
impl ProviderGateway for OpenAiGateway {
    async fn upload_document(
        &self,
        document: Document,
        purpose: &str,
    ) -> Result<String, GatewayError> {
        let part = reqwest::multipart::Part::bytes(document.bytes)
            .file_name(document.filename)
            .mime_str("application/octet-stream")
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", purpose.to_string())
            .part("file", part);

        let created: IdObject = self
            .send(self.client.post(self.url("files")).multipart(form), "files")
            .await?;
        Ok(created.id)
    }

    async fn ensure_profile(
        &self,
        cached_id: Option<&str>,
        spec: &ProfileSpec,
    ) -> Result<AssistantProfile, GatewayError> {
        if let Some(id) = cached_id {
            let target = format!("assistants/{}", id);
            match self.send::<IdObject>(self.client.get(self.url(&target)), &target).await {
                Ok(found) => {
                    return Ok(AssistantProfile {
                        id: found.id,
                        reused: true,
                    })
                }
                Err(e @ (GatewayError::NotFound(_) | GatewayError::Rejected { .. }))
                    if !e.is_transient() =>
                {
                    tracing::warn!(profile_id = id, error = %e, "Cached assistant rejected, creating a new one");
                }
                Err(e) => return Err(e),
            }
        }

        let body = CreateAssistant {
            name: &spec.name,
            instructions: &spec.instructions,
            model: &spec.model,
            tools: vec![json!({ "type": "file_search" })],
        };
        let created: IdObject = self
            .send(self.client.post(self.url("assistants")).json(&body), "assistants")
            .await?;
        Ok(AssistantProfile {
            id: created.id,
            reused: false,
        })
    }

    async fn create_index(&self, file_id: &str, name: &str) -> Result<String, GatewayError> {
        let body = json!({ "name": name, "file_ids": [file_id] });
        let created: IdObject = self
            .send(self.client.post(self.url("vector_stores")).json(&body), "vector_stores")
            .await?;
        Ok(created.id)
    }

    async fn create_session(&self, index_id: &str) -> Result<String, GatewayError> {
        let body = json!({
            "tool_resources": { "file_search": { "vector_store_ids": [index_id] } }
        });
        let created: IdObject = self
            .send(self.client.post(self.url("threads")).json(&body), "threads")
            .await?;
        Ok(created.id)
    }

    async fn post_message(
        &self,
        session_id: &str,
        content: &MessageContent,
    ) -> Result<(), GatewayError> {
        let content = match content {
            MessageContent::Text(text) => json!(text),
            MessageContent::TextWithImage { text, image } => json!([
                { "type": "text", "text": text },
                {
                    "type": "image_url",
                    "image_url": { "url": image.data_url(), "detail": "high" }
                }
            ]),
        };
        let body = json!({ "role": "user", "content": content });
        let target = format!("threads/{}/messages", session_id);
        let _: IdObject = self
            .send(self.client.post(self.url(&target)).json(&body), &target)
            .await?;
        Ok(())
    }

    async fn start_run(&self, session_id: &str, profile_id: &str) -> Result<String, GatewayError> {
        let target = format!("threads/{}/runs", session_id);
        let body = json!({ "assistant_id": profile_id });
        let run: RunObject = self
            .send(self.client.post(self.url(&target)).json(&body), &target)
            .await?;
        Ok(run.id)
    }

    async fn poll_run(&self, session_id: &str, run_id: &str) -> Result<RunStatus, GatewayError> {
        let target = format!("threads/{}/runs/{}", session_id, run_id);
        let run: RunObject = self.send(self.client.get(self.url(&target)), &target).await?;
        Ok(map_run_status(run))
    }

    async fn fetch_last_message(&self, session_id: &str) -> Result<String, GatewayError> {
        let target = format!("threads/{}/messages", session_id);
        let request = self
            .client
            .get(self.url(&target))
            .query(&[("order", "desc"), ("limit", "1")]);
        let list: MessageList = self.send(request, &target).await?;

        let message = list
            .data
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Decode("conversation has no messages".into()))?;

        message
            .content
            .into_iter()
            .find_map(|part| part.text.map(|t| t.value))
            .ok_or_else(|| GatewayError::Decode("latest message has no text content".into()))
    }

    async fn delete_resource(&self, kind: ResourceKind, id: &str) -> Result<(), GatewayError> {
        let target = Self::resource_path(kind, id);
        Self::execute(self.client.delete(self.url(&target)), &target).await?;
        Ok(())
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CreateAssistant<'a> {
    name: &'a str,
    instructions: &'a str,
    model: &'a str,
    tools: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> OpenAiGateway {
        OpenAiGateway::with_base_url("sk-test", server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn spec() -> ProfileSpec {
        ProfileSpec {
            name: "Reference Answer Assistant".into(),
            model: "gpt-4-turbo-preview".into(),
            instructions: "Answer with a JSON array.".into(),
        }
    }

    #[tokio::test]
    async fn test_upload_document_returns_file_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/files"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "file-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = gateway(&server)
            .upload_document(Document::new("script.pdf", b"%PDF-1.7".to_vec()), "assistants")
            .await
            .unwrap();
        assert_eq!(id, "file-1");
    }

    #[tokio::test]
    async fn test_ensure_profile_reuses_cached_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/assistants/asst_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "asst_1" })))
            .mount(&server)
            .await;

        let profile = gateway(&server)
            .ensure_profile(Some("asst_1"), &spec())
            .await
            .unwrap();
        assert_eq!(profile, AssistantProfile { id: "asst_1".into(), reused: true });
    }

    #[tokio::test]
    async fn test_ensure_profile_creates_when_cached_id_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/assistants/asst_gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/assistants"))
            .and(body_partial_json(json!({ "tools": [{ "type": "file_search" }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "asst_new" })))
            .expect(1)
            .mount(&server)
            .await;

        let profile = gateway(&server)
            .ensure_profile(Some("asst_gone"), &spec())
            .await
            .unwrap();
        assert_eq!(profile.id, "asst_new");
        assert!(!profile.reused);
    }

    #[tokio::test]
    async fn test_ensure_profile_propagates_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/assistants/asst_1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .ensure_profile(Some("asst_1"), &spec())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_poll_run_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/threads/thread_1/runs/run_a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "run_a", "status": "in_progress" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/threads/thread_1/runs/run_b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "run_b",
                "status": "failed",
                "last_error": { "code": "server_error", "message": "model overloaded" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/threads/thread_1/runs/run_c"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "run_c", "status": "expired" })),
            )
            .mount(&server)
            .await;

        let gw = gateway(&server);
        assert_eq!(
            gw.poll_run("thread_1", "run_a").await.unwrap(),
            RunStatus::Pending("in_progress".into())
        );
        assert_eq!(
            gw.poll_run("thread_1", "run_b").await.unwrap(),
            RunStatus::Failed { reason: Some("model overloaded".into()) }
        );
        assert_eq!(
            gw.poll_run("thread_1", "run_c").await.unwrap(),
            RunStatus::Failed { reason: Some("run expired".into()) }
        );
    }

    #[tokio::test]
    async fn test_fetch_last_message_reads_text_part() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/threads/thread_1/messages"))
            .and(query_param("order", "desc"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": "msg_1",
                    "content": [{ "type": "text", "text": { "value": "[{\"q\":1}]", "annotations": [] } }]
                }]
            })))
            .mount(&server)
            .await;

        let text = gateway(&server).fetch_last_message("thread_1").await.unwrap();
        assert_eq!(text, "[{\"q\":1}]");
    }

    #[tokio::test]
    async fn test_delete_missing_resource_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/vector_stores/vs_1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .delete_resource(ResourceKind::Index, "vs_1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejection_surfaces_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/threads"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "Invalid vector store id", "type": "invalid_request_error" }
            })))
            .mount(&server)
            .await;

        let err = gateway(&server).create_session("vs_bad").await.unwrap_err();
        match err {
            GatewayError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid vector store id");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_config_requires_api_key() {
        assert!(OpenAiGateway::from_config(&ProviderConfig::default()).is_err());

        let config = ProviderConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert!(OpenAiGateway::from_config(&config).is_ok());
    }

    #[test]
    fn test_key_that_cannot_be_a_header_is_rejected() {
        let config = ProviderConfig {
            api_key: Some("sk-test\nInjected: yes".into()),
            ..Default::default()
        };
        let err = OpenAiGateway::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("api key"));
    }
}
