use std::sync::Arc;

mod function;
mod provider;
mod rig_adapter;

pub use function::{FUNCTION_PROVIDER_ID, FunctionGenerator};
pub use provider::{
    AgentConfig, BoxFuture, GenerationRequest, GenerationResponse, GeneratorConfig, ProviderError,
    ProviderMessage, ProviderResult, ReplyGenerator, Role,
};
pub use rig_adapter::{DEFAULT_OPENAI_MODEL, RIG_OPENAI_PROVIDER_ID, RigGenerator};

pub fn create_generator(mut config: GeneratorConfig) -> ProviderResult<Arc<dyn ReplyGenerator>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigGenerator::new(config)))
        }
        "function" | "edge-function" => {
            config.provider_id = FUNCTION_PROVIDER_ID.to_string();
            Ok(Arc::new(FunctionGenerator::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-generator",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_aliases_are_normalized() {
        let generator = create_generator(GeneratorConfig::new("", "sk", "")).unwrap();
        assert_eq!(generator.id(), RIG_OPENAI_PROVIDER_ID);

        let generator =
            create_generator(GeneratorConfig::new("edge-function", "", "http://localhost/chat"))
                .unwrap();
        assert_eq!(generator.id(), FUNCTION_PROVIDER_ID);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let error = create_generator(GeneratorConfig::new("carrier-pigeon", "", "")).err();
        let Some(ProviderError::UnsupportedProvider { provider_id, .. }) = error else {
            panic!("expected an unsupported provider error, got {error:?}");
        };
        assert_eq!(provider_id, "carrier-pigeon");
    }
}
