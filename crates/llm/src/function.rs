use std::time::Duration;

use serde::Deserialize;
use snafu::{ResultExt, ensure};

use super::provider::{
    BoxFuture, EmptyMessageSetSnafu, FunctionPayloadParseSnafu, FunctionReportedSnafu,
    FunctionRequestSnafu, FunctionStatusSnafu, GenerationRequest, GenerationResponse,
    GeneratorConfig, MissingEndpointSnafu, MissingReplySnafu, ProviderResult, ReplyGenerator,
};

pub const FUNCTION_PROVIDER_ID: &str = "function";

const REQUEST_TIMEOUT_SECS: u64 = 120;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Reply body of the hosted chat function.
#[derive(Debug, Deserialize)]
struct FunctionReply {
    #[serde(default, rename = "generatedText")]
    generated_text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Invokes a hosted "chat" function over HTTP.
///
/// The function receives the whole conversation plus agent configuration and answers with
/// `{"generatedText": "..."}`. Which model runs behind it is opaque to the client.
pub struct FunctionGenerator {
    config: GeneratorConfig,
    http: reqwest::Client,
}

impl FunctionGenerator {
    pub fn new(config: GeneratorConfig) -> ProviderResult<Self> {
        ensure!(
            !config.endpoint.is_empty(),
            MissingEndpointSnafu {
                stage: "function-generator-new",
                provider_id: config.provider_id.clone(),
            }
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context(FunctionRequestSnafu {
                stage: "function-build-client",
            })?;

        Ok(Self { config, http })
    }

    async fn invoke(&self, request: GenerationRequest) -> ProviderResult<GenerationResponse> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "function-invoke",
            }
        );

        let mut builder = self.http.post(&self.config.endpoint).json(&request);
        if let Some(function_key) = &self.config.function_key {
            builder = builder.bearer_auth(function_key);
        }

        let response = builder.send().await.context(FunctionRequestSnafu {
            stage: "function-send",
        })?;
        let status = response.status();
        let body = response.text().await.context(FunctionRequestSnafu {
            stage: "function-read-body",
        })?;

        if !status.is_success() {
            tracing::warn!(
                provider_id = %self.config.provider_id,
                status = status.as_u16(),
                "chat function returned a non-success status"
            );
            return FunctionStatusSnafu {
                stage: "function-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        parse_reply(&self.config.provider_id, &body)
    }
}

fn parse_reply(provider_id: &str, body: &str) -> ProviderResult<GenerationResponse> {
    let reply: FunctionReply = serde_json::from_str(body).context(FunctionPayloadParseSnafu {
        stage: "function-parse-reply",
    })?;

    if let Some(message) = reply.error.filter(|message| !message.trim().is_empty()) {
        return FunctionReportedSnafu {
            stage: "function-reply-error",
            message,
        }
        .fail();
    }

    match reply.generated_text {
        Some(generated_text) if !generated_text.trim().is_empty() => {
            Ok(GenerationResponse { generated_text })
        }
        _ => MissingReplySnafu {
            stage: "function-reply-text",
            provider_id: provider_id.to_string(),
        }
        .fail(),
    }
}

impl ReplyGenerator for FunctionGenerator {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn generate<'a>(
        &'a self,
        request: GenerationRequest,
    ) -> BoxFuture<'a, ProviderResult<GenerationResponse>> {
        Box::pin(self.invoke(request))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::provider::{AgentConfig, ProviderError, ProviderMessage, Role};

    /// Serves exactly one HTTP response and hands back the raw request it received.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buffer = [0_u8; 4096];

            loop {
                let read = socket.read(&mut buffer).await.unwrap();
                if read == 0 {
                    break;
                }
                received.extend_from_slice(&buffer[..read]);
                if request_is_complete(&received) {
                    break;
                }
            }

            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&received).into_owned()
        });

        (format!("http://{address}/functions/v1/chat"), handle)
    }

    fn request_is_complete(received: &[u8]) -> bool {
        let text = String::from_utf8_lossy(received);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        received.len() >= header_end + 4 + content_length
    }

    fn sample_request() -> GenerationRequest {
        GenerationRequest::new(
            vec![ProviderMessage::new(Role::User, "hi")],
            AgentConfig {
                id: "agent-1".to_string(),
                name: "Helper".to_string(),
                ..AgentConfig::default()
            },
        )
        .with_api_key(Some("sk-user".to_string()))
    }

    #[test]
    fn endpoint_is_required() {
        let error = FunctionGenerator::new(GeneratorConfig::new("function", "", "")).err();
        assert!(matches!(error, Some(ProviderError::MissingEndpoint { .. })));
    }

    #[test]
    fn reply_parsing_distinguishes_failures() {
        let reply = parse_reply("function", r#"{"generatedText":"hello"}"#).unwrap();
        assert_eq!(reply.generated_text, "hello");

        assert!(matches!(
            parse_reply("function", r#"{"generatedText":"   "}"#),
            Err(ProviderError::MissingReply { .. })
        ));
        assert!(matches!(
            parse_reply("function", "{}"),
            Err(ProviderError::MissingReply { .. })
        ));
        assert!(matches!(
            parse_reply("function", r#"{"error":"quota exceeded"}"#),
            Err(ProviderError::FunctionReported { message, .. }) if message == "quota exceeded"
        ));
        assert!(matches!(
            parse_reply("function", "not json"),
            Err(ProviderError::FunctionPayloadParse { .. })
        ));
    }

    #[tokio::test]
    async fn posts_conversation_and_reads_generated_text() {
        let (endpoint, server) =
            serve_once("HTTP/1.1 200 OK", r#"{"generatedText":"Hello there!"}"#).await;
        let generator = FunctionGenerator::new(
            GeneratorConfig::new("function", "", endpoint)
                .with_function_key(Some("fn-key".to_string())),
        )
        .unwrap();

        let reply = generator.generate(sample_request()).await.unwrap();
        assert_eq!(reply.generated_text, "Hello there!");

        let raw_request = server.await.unwrap();
        assert!(raw_request.starts_with("POST /functions/v1/chat"));
        let lowered = raw_request.to_ascii_lowercase();
        assert!(lowered.contains("authorization: bearer fn-key"));
        assert!(raw_request.contains(r#""agentConfig""#));
        assert!(raw_request.contains(r#""apiKey":"sk-user""#));
        assert!(raw_request.contains(r#""content":"hi""#));
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let (endpoint, server) =
            serve_once("HTTP/1.1 500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let generator =
            FunctionGenerator::new(GeneratorConfig::new("function", "", endpoint)).unwrap();

        let error = generator.generate(sample_request()).await.unwrap_err();
        let ProviderError::FunctionStatus { status, .. } = error else {
            panic!("expected a status error, got {error:?}");
        };
        assert_eq!(status, 500);
        server.await.unwrap();
    }
}
