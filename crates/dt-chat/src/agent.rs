// agent.rs — Client for the external agent service.
//
// The agent service owns the model reasoning; this side only ships it a
// context and takes back a reply plus any proposed actions. Three calls:
//
//   POST /chat/process          full chat turn
//   POST /chat/generate-title   short title for a new conversation
//   POST /agents/summarize      rolling conversation summary
//
// Wire types are camelCase; everything past this module is snake_case.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::AgentContext;
use crate::error::AgentError;

pub const DEFAULT_AGENT_URL: &str = "http://localhost:8001";
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(120);
const SERVICE_TOKEN_HEADER: &str = "x-service-token";

const PROCESS_ENDPOINT: &str = "/chat/process";
const TITLE_ENDPOINT: &str = "/chat/generate-title";
const SUMMARIZE_ENDPOINT: &str = "/agents/summarize";

/// One line of a role-tagged transcript (`user` or `assistant`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub content: String,
    pub context: AgentContext,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    /// Agent id → tool sets that agent may use.
    #[serde(default)]
    pub agent_tool_sets: BTreeMap<String, Vec<String>>,
}

/// An action the agent wants a human to approve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentProposal {
    #[serde(default)]
    pub agent_id: Option<String>,
    pub action_type: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub affected_entities: Vec<serde_json::Value>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    pub content: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub proposals: Vec<AgentProposal>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
}

#[derive(Serialize)]
struct TitleRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct TitleResponse {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Serialize)]
struct SummarizeRequest<'a> {
    messages: &'a [TranscriptEntry],
}

#[derive(Deserialize)]
struct SummarizeResponse {
    #[serde(default)]
    summary: Option<String>,
}

#[async_trait]
pub trait AgentService: Send + Sync {
    /// Run one chat turn.
    async fn process(&self, request: &ProcessRequest) -> Result<AgentReply, AgentError>;

    /// Suggest a title for a conversation from its first message.
    async fn generate_title(&self, message: &str) -> Result<Option<String>, AgentError>;

    /// Summarize a transcript, oldest line first.
    async fn summarize(&self, messages: &[TranscriptEntry]) -> Result<Option<String>, AgentError>;
}

#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    pub base_url: String,
    pub service_token: String,
    pub timeout: Duration,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_AGENT_URL.to_string(),
            service_token: "dev-token".to_string(),
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }
}

/// [`AgentService`] over HTTP. No retries: a failed call is final for
/// that invocation.
pub struct HttpAgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAgentClient {
    pub fn new(config: &AgentClientConfig) -> Result<Self, AgentError> {
        let token = HeaderValue::from_str(&config.service_token)
            .map_err(|_| AgentError::Unavailable("service token is not a valid header value".into()))?;
        let mut headers = HeaderMap::new();
        headers.insert(SERVICE_TOKEN_HEADER, token);

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AgentError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, R>(&self, endpoint: &'static str, body: &B) -> Result<R, AgentError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!(%url, "calling agent service");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| AgentError::Request { endpoint, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<R>()
            .await
            .map_err(|source| AgentError::Decode { endpoint, source })
    }
}

#[async_trait]
impl AgentService for HttpAgentClient {
    async fn process(&self, request: &ProcessRequest) -> Result<AgentReply, AgentError> {
        self.post(PROCESS_ENDPOINT, request).await
    }

    async fn generate_title(&self, message: &str) -> Result<Option<String>, AgentError> {
        let response: TitleResponse = self.post(TITLE_ENDPOINT, &TitleRequest { message }).await?;
        Ok(response.title)
    }

    async fn summarize(&self, messages: &[TranscriptEntry]) -> Result<Option<String>, AgentError> {
        let response: SummarizeResponse = self
            .post(SUMMARIZE_ENDPOINT, &SummarizeRequest { messages })
            .await?;
        Ok(response.summary)
    }
}
