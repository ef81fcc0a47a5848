use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{OptionExt, ResultExt};

use super::provider::{
    BoxFuture, CompletionsFailedSnafu, EmptyMessageSetSnafu, GenerationRequest, GenerationResponse,
    GeneratorConfig, HttpClientSnafu, MissingApiKeySnafu, MissingReplySnafu, ProviderError,
    ProviderMessage, ProviderResult, ReplyGenerator, Role,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// Generates replies through an OpenAI-compatible provider via Rig.
pub struct RigGenerator {
    config: GeneratorConfig,
}

impl RigGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    fn resolve_api_key<'r>(&'r self, request: &'r GenerationRequest) -> ProviderResult<&'r str> {
        // A per-request key wins so each user can bring their own credentials.
        let configured = self.config.api_key.as_str();
        request
            .api_key
            .as_deref()
            .or_else(|| (!configured.is_empty()).then_some(configured))
            .context(MissingApiKeySnafu {
                stage: "rig-resolve-api-key",
                provider_id: self.config.provider_id.clone(),
            })
    }

    fn resolve_model(&self, request: &GenerationRequest) -> String {
        request
            .agent_config
            .model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .or(self.config.default_model.as_deref())
            .unwrap_or(DEFAULT_OPENAI_MODEL)
            .to_string()
    }

    fn build_client(&self, api_key: &str) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(api_key);
        if !self.config.endpoint.is_empty() {
            builder = builder.base_url(self.config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
        if message.content.trim().is_empty() {
            return None;
        }

        match message.role {
            Role::User => Some(RigMessage::user(message.content.clone())),
            Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    fn preamble(request: &GenerationRequest) -> Option<String> {
        let agent = &request.agent_config;
        let mut preamble_parts = Vec::new();

        if let Some(system_prompt) = &agent.system_prompt
            && !system_prompt.trim().is_empty()
        {
            preamble_parts.push(system_prompt.trim().to_string());
        }

        // Agents without an explicit prompt still introduce themselves by name and description.
        if preamble_parts.is_empty() && !agent.name.trim().is_empty() {
            let mut persona = format!("You are {}.", agent.name.trim());
            if !agent.description.trim().is_empty() {
                persona.push(' ');
                persona.push_str(agent.description.trim());
            }
            preamble_parts.push(persona);
        }

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    async fn open_stream(
        &self,
        request: &GenerationRequest,
    ) -> ProviderResult<RigStreamingResponse> {
        let api_key = self.resolve_api_key(request)?;
        let client = self.build_client(api_key)?;
        let model_id = self.resolve_model(request);
        let model = client.completion_model(model_id.clone());

        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let Some(prompt) = messages.pop() else {
            tracing::warn!(
                model_id = %model_id,
                total_message_count = request.messages.len(),
                "cannot open stream because no non-empty messages remain"
            );
            return EmptyMessageSetSnafu {
                stage: "open-stream-pop-prompt",
            }
            .fail();
        };
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::preamble(request) {
            builder = builder.preamble(preamble);
        }

        if let Some(temperature) = request.agent_config.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.agent_config.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    async fn collect_reply(
        &self,
        request: GenerationRequest,
    ) -> ProviderResult<GenerationResponse> {
        let mut stream = self.open_stream(&request).await?;
        let mut reply = String::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(StreamedAssistantContent::Text(text)) => reply.push_str(&text.text),
                // Reasoning and tool traffic never becomes part of the persisted reply.
                Ok(_) => {}
                Err(source) => {
                    tracing::warn!(
                        provider_id = %self.config.provider_id,
                        error = %source,
                        "provider stream emitted an error chunk"
                    );
                    return Err(ProviderError::CompletionsFailed {
                        stage: "stream-chunk",
                        source,
                    });
                }
            }
        }

        if reply.trim().is_empty() {
            return MissingReplySnafu {
                stage: "collect-reply",
                provider_id: self.config.provider_id.clone(),
            }
            .fail();
        }

        Ok(GenerationResponse {
            generated_text: reply,
        })
    }
}

impl ReplyGenerator for RigGenerator {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn generate<'a>(
        &'a self,
        request: GenerationRequest,
    ) -> BoxFuture<'a, ProviderResult<GenerationResponse>> {
        Box::pin(self.collect_reply(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AgentConfig;

    fn request_with_agent(agent_config: AgentConfig) -> GenerationRequest {
        GenerationRequest::new(vec![ProviderMessage::new(Role::User, "hi")], agent_config)
    }

    #[test]
    fn system_prompt_takes_precedence_over_persona() {
        let request = request_with_agent(AgentConfig {
            name: "Helper".to_string(),
            system_prompt: Some("  Be brief.  ".to_string()),
            ..AgentConfig::default()
        });
        assert_eq!(RigGenerator::preamble(&request).as_deref(), Some("Be brief."));
    }

    #[test]
    fn persona_is_built_from_name_and_description() {
        let request = request_with_agent(AgentConfig {
            name: "Helper".to_string(),
            description: "Answers questions.".to_string(),
            ..AgentConfig::default()
        });
        assert_eq!(
            RigGenerator::preamble(&request).as_deref(),
            Some("You are Helper. Answers questions.")
        );
        let anonymous = request_with_agent(AgentConfig::default());
        assert!(RigGenerator::preamble(&anonymous).is_none());
    }

    #[test]
    fn model_falls_back_from_agent_to_config_to_default() {
        let generator = RigGenerator::new(GeneratorConfig::new("openai", "", ""));
        let mut request = request_with_agent(AgentConfig::default());
        assert_eq!(generator.resolve_model(&request), DEFAULT_OPENAI_MODEL);

        let generator = RigGenerator::new(
            GeneratorConfig::new("openai", "", "").with_default_model(Some("gpt-4o".to_string())),
        );
        assert_eq!(generator.resolve_model(&request), "gpt-4o");

        request.agent_config.model = Some("o3".to_string());
        assert_eq!(generator.resolve_model(&request), "o3");
    }

    #[test]
    fn request_key_overrides_configured_key() {
        let generator = RigGenerator::new(GeneratorConfig::new("openai", "sk-config", ""));
        let request = request_with_agent(AgentConfig::default());
        assert_eq!(generator.resolve_api_key(&request).unwrap(), "sk-config");

        let request = request.with_api_key(Some("sk-user".to_string()));
        assert_eq!(generator.resolve_api_key(&request).unwrap(), "sk-user");
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_network_call() {
        let generator = RigGenerator::new(GeneratorConfig::new("openai", "", ""));
        let error = generator
            .generate(request_with_agent(AgentConfig::default()))
            .await
            .unwrap_err();
        assert!(matches!(error, ProviderError::MissingApiKey { .. }));
    }

    #[test]
    fn blank_messages_are_not_forwarded() {
        let blank = ProviderMessage::new(Role::Assistant, "  ");
        assert!(RigGenerator::to_rig_message(&blank).is_none());
    }
}
