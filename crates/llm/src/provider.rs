use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Speaker role as seen by the generation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Agent persona forwarded with every generation request.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

/// One call of the external generation function.
#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub messages: Vec<ProviderMessage>,
    pub agent_config: AgentConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<ProviderMessage>, agent_config: AgentConfig) -> Self {
        Self {
            messages,
            agent_config,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("GenerationRequest")
            .field("messages", &self.messages)
            .field("agent_config", &self.agent_config)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResponse {
    pub generated_text: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub function_key: Option<String>,
    pub default_model: Option<String>,
}

impl GeneratorConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            function_key: None,
            default_model: None,
        }
    }

    pub fn with_function_key(mut self, function_key: Option<String>) -> Self {
        self.function_key = function_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self
    }

    pub fn with_default_model(mut self, default_model: Option<String>) -> Self {
        self.default_model = default_model
            .map(|model| model.trim().to_string())
            .filter(|model| !model.is_empty());
        self
    }
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("GeneratorConfig")
            .field("provider_id", &self.provider_id)
            .field("api_key", &(!self.api_key.is_empty()).then_some("<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("function_key", &self.function_key.as_ref().map(|_| "<redacted>"))
            .field("default_model", &self.default_model)
            .finish()
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("missing endpoint for provider '{provider_id}'"))]
    MissingEndpoint {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("generation request has no user or assistant messages"))]
    EmptyMessageSet { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("function request failed on `{stage}`, {source}"))]
    FunctionRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("function endpoint returned status {status}: {body}"))]
    FunctionStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to parse function reply: {source}"))]
    FunctionPayloadParse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("function reported an error: {message}"))]
    FunctionReported {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("provider '{provider_id}' returned no reply text"))]
    MissingReply {
        stage: &'static str,
        provider_id: String,
    },
}

/// Opaque "generate a reply" function the chat controller delegates to.
pub trait ReplyGenerator: Send + Sync {
    fn id(&self) -> &str;
    fn generate<'a>(
        &'a self,
        request: GenerationRequest,
    ) -> BoxFuture<'a, ProviderResult<GenerationResponse>>;
}
