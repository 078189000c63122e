//! HTTP adapter for an Assistants-style completion REST API.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::{ProviderError, ProviderResult};
use super::types::{Role, RunHandle, RunStatus, SessionSpec, ThreadMessage};
use super::{require_identifier, CompletionProvider};

const ASSISTANTS_BETA_HEADER: &str = "assistants=v2";

/// Connection settings for [`HttpCompletionProvider`]
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    /// Number of messages requested when reading a thread
    pub list_messages_limit: u32,
}

/// Completion provider backed by a remote REST API
#[derive(Clone)]
pub struct HttpCompletionProvider {
    client: Client,
    config: HttpProviderConfig,
}

impl std::fmt::Debug for HttpCompletionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionProvider")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl HttpCompletionProvider {
    pub fn new(config: HttpProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::transport("build_client", e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send<R: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ProviderResult<R> {
        debug!(operation = operation, path = path, "Calling completion provider");

        let mut request = self
            .client
            .request(method, self.url(path))
            .bearer_auth(&self.config.api_key)
            .header("OpenAI-Beta", ASSISTANTS_BETA_HEADER);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::transport(operation, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            warn!(
                operation = operation,
                status = status.as_u16(),
                "Completion provider rejected request"
            );
            return Err(ProviderError::status(operation, status.as_u16(), body));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ProviderError::invalid_payload(operation, e.to_string()))
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn create_session(&self, spec: &SessionSpec) -> ProviderResult<String> {
        let mut body = json!({
            "name": spec.name,
            "model": spec.model,
            "instructions": spec.instructions,
        });
        if let Some(temperature) = spec.temperature {
            body["temperature"] = json!(temperature);
        }
        if !spec.reference_file_ids.is_empty() {
            body["tools"] = json!([{ "type": "code_interpreter" }]);
            body["tool_resources"] = json!({
                "code_interpreter": { "file_ids": spec.reference_file_ids },
            });
        }

        let created: IdResponse = self
            .send("create_session", Method::POST, "assistants", Some(body))
            .await?;
        require_identifier("create_session", created.id)
    }

    async fn create_thread(&self) -> ProviderResult<String> {
        let created: IdResponse = self
            .send("create_thread", Method::POST, "threads", Some(json!({})))
            .await?;
        require_identifier("create_thread", created.id)
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> ProviderResult<String> {
        let created: IdResponse = self
            .send(
                "post_message",
                Method::POST,
                &format!("threads/{thread_id}/messages"),
                Some(json!({ "role": role.as_str(), "content": content })),
            )
            .await?;
        require_identifier("post_message", created.id)
    }

    async fn trigger_run(&self, thread_id: &str, session_id: &str) -> ProviderResult<RunHandle> {
        let run: RunResponse = self
            .send(
                "trigger_run",
                Method::POST,
                &format!("threads/{thread_id}/runs"),
                Some(json!({ "assistant_id": session_id })),
            )
            .await?;
        Ok(RunHandle {
            run_id: require_identifier("trigger_run", run.id)?,
            status: run.status,
        })
    }

    async fn poll_run(&self, thread_id: &str, run_id: &str) -> ProviderResult<RunStatus> {
        let run: RunResponse = self
            .send(
                "poll_run",
                Method::GET,
                &format!("threads/{thread_id}/runs/{run_id}"),
                None,
            )
            .await?;
        Ok(run.status)
    }

    async fn list_messages(&self, thread_id: &str) -> ProviderResult<Vec<ThreadMessage>> {
        let page: MessagePage = self
            .send(
                "list_messages",
                Method::GET,
                &format!(
                    "threads/{thread_id}/messages?order=desc&limit={}",
                    self.config.list_messages_limit
                ),
                None,
            )
            .await?;

        Ok(page
            .data
            .into_iter()
            .map(|message| ThreadMessage {
                id: message.id,
                role: message.role,
                content: message
                    .content
                    .into_iter()
                    .filter_map(|part| part.text.map(|text| text.value))
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
            .collect())
    }

    async fn delete_session(&self, session_id: &str) -> ProviderResult<()> {
        let _: Value = self
            .send(
                "delete_session",
                Method::DELETE,
                &format!("assistants/{session_id}"),
                None,
            )
            .await?;
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> ProviderResult<()> {
        let _: Value = self
            .send(
                "delete_thread",
                Method::DELETE,
                &format!("threads/{thread_id}"),
                None,
            )
            .await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct IdResponse {
    id: Option<String>,
}

#[derive(Deserialize)]
struct RunResponse {
    id: Option<String>,
    status: RunStatus,
}

#[derive(Deserialize)]
struct MessagePage {
    #[serde(default)]
    data: Vec<RemoteMessage>,
}

#[derive(Deserialize)]
struct RemoteMessage {
    id: String,
    role: Role,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Deserialize)]
struct TextContent {
    value: String,
}
