use std::sync::Arc;

use parlor_llm::{AgentConfig, GenerationRequest, ReplyGenerator};
use parlor_storage::{
    AgentId, AgentRecord, NewMessage, NewSession, SessionId, SessionRecord, Storage, UserId,
};
use snafu::{OptionExt, ResultExt};
use tokio::sync::{Mutex, MutexGuard, mpsc};

use crate::chat::error::{
    AgentNotFoundSnafu, AuthenticationRequiredSnafu, ChatError, ChatResult, ErrorKind,
    GenerationSnafu, InvalidSessionParamSnafu, PermissionDeniedSnafu, PersistenceSnafu,
    PhaseRejectedSnafu, SessionNotFoundSnafu,
};
use crate::chat::events::{ChatEvent, Notification};
use crate::chat::message::{ConversationPhase, Message, PhaseTransition};
use crate::chat::session_param::{SessionParam, parse_session_param};

/// Static inputs of a controller.
#[derive(Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Agent used for new sessions and restored on reset.
    pub agent_id: AgentId,
    /// Forwarded verbatim to the generation function.
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ControllerConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ControllerConfig")
            .field("agent_id", &self.agent_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input or no signed-in user. Nothing was touched.
    Skipped,
    Replied(Message),
}

/// Owns one conversation: the in-memory transcript, the session it is bound to,
/// and the loading flag.
///
/// Every operation takes `&mut self`, so a single controller never runs two
/// operations at once. Share it across tasks through [`ChatHandle`].
pub struct ChatController {
    storage: Arc<dyn Storage>,
    generator: Arc<dyn ReplyGenerator>,
    config: ControllerConfig,
    agent_id: AgentId,
    user_id: Option<UserId>,
    messages: Vec<Message>,
    phase: ConversationPhase,
    is_loading: bool,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl ChatController {
    pub fn new(
        storage: Arc<dyn Storage>,
        generator: Arc<dyn ReplyGenerator>,
        config: ControllerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            storage,
            generator,
            agent_id: config.agent_id,
            config,
            user_id: None,
            messages: Vec::new(),
            phase: ConversationPhase::Empty,
            is_loading: false,
            events,
        };
        (controller, receiver)
    }

    pub fn sign_in(&mut self, user_id: UserId) {
        tracing::info!(%user_id, "chat user signed in");
        self.user_id = Some(user_id);
    }

    pub fn sign_out(&mut self) {
        self.user_id = None;
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.phase.session_id()
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Sends one user turn and waits for the agent's reply.
    ///
    /// The user message is shown before anything is persisted and stays in the
    /// transcript even when a later step fails.
    pub async fn send_message(&mut self, text: &str) -> ChatResult<SendOutcome> {
        if text.trim().is_empty() {
            return Ok(SendOutcome::Skipped);
        }
        let Some(user_id) = self.user_id else {
            tracing::debug!("ignoring message sent without a signed-in user");
            return Ok(SendOutcome::Skipped);
        };

        let message = Message::user(text);
        self.messages.push(message.clone());
        self.emit(ChatEvent::MessageAppended(message));

        self.set_loading(true);
        let result = self.deliver(user_id, text).await;
        self.set_loading(false);

        match result {
            Ok(reply) => Ok(SendOutcome::Replied(reply)),
            Err(error) => Err(self.surface(error)),
        }
    }

    async fn deliver(&mut self, user_id: UserId, text: &str) -> ChatResult<Message> {
        let session_id = self.ensure_session(user_id, text).await?;

        self.storage
            .append_message(session_id, NewMessage::user(text))
            .await
            .context(PersistenceSnafu {
                stage: "persist-user-message",
            })?;

        let agent = self
            .storage
            .get_agent(self.agent_id)
            .await
            .context(PersistenceSnafu {
                stage: "load-agent",
            })?
            .context(AgentNotFoundSnafu {
                stage: "load-agent",
                agent_id: self.agent_id,
            })?;

        let request = GenerationRequest::new(
            self.messages.iter().map(Message::to_provider).collect(),
            agent_config(&agent),
        )
        .with_api_key(self.config.api_key.clone());

        tracing::debug!(
            %session_id,
            generator = self.generator.id(),
            messages = request.messages.len(),
            "requesting agent reply"
        );
        let response = self
            .generator
            .generate(request)
            .await
            .context(GenerationSnafu {
                stage: "generate-reply",
            })?;

        let reply = Message::assistant(response.generated_text);
        self.storage
            .append_message(session_id, NewMessage::assistant(reply.content.clone()))
            .await
            .context(PersistenceSnafu {
                stage: "persist-assistant-message",
            })?;

        self.messages.push(reply.clone());
        self.emit(ChatEvent::MessageAppended(reply.clone()));
        Ok(reply)
    }

    async fn ensure_session(
        &mut self,
        user_id: UserId,
        first_message: &str,
    ) -> ChatResult<SessionId> {
        if let Some(session_id) = self.phase.session_id() {
            return Ok(session_id);
        }

        self.transition(PhaseTransition::BeginSession, "begin-session")?;
        let created = self
            .storage
            .create_session(NewSession::from_first_message(
                self.agent_id,
                user_id,
                first_message,
            ))
            .await;

        match created {
            Ok(session) => {
                self.transition(PhaseTransition::SessionCreated(session.id), "session-created")?;
                tracing::info!(
                    session_id = %session.id,
                    title = %session.title,
                    "created chat session"
                );
                self.emit(ChatEvent::SessionChanged(Some(session.id)));
                Ok(session.id)
            }
            Err(source) => {
                self.transition(PhaseTransition::SessionCreationFailed, "session-creation-failed")?;
                Err(ChatError::Persistence {
                    stage: "create-session",
                    source,
                })
            }
        }
    }

    /// Replaces the transcript with a persisted session owned by the caller.
    ///
    /// On failure the transcript and the bound session are left untouched.
    pub async fn load_session(&mut self, session_id: SessionId) -> ChatResult<()> {
        let Some(user_id) = self.user_id else {
            return Err(self.surface(
                AuthenticationRequiredSnafu {
                    stage: "load-session",
                }
                .build(),
            ));
        };

        self.set_loading(true);
        let result = self.fetch_session(user_id, session_id).await;
        self.set_loading(false);

        let (session, messages) = match result {
            Ok(loaded) => loaded,
            Err(error) => return Err(self.surface(error)),
        };

        if let Err(error) =
            self.transition(PhaseTransition::SessionLoaded(session.id), "load-session")
        {
            return Err(self.surface(error));
        }
        self.agent_id = session.agent_id;
        self.messages = messages;

        tracing::info!(%session_id, messages = self.messages.len(), "loaded chat session");
        self.emit(ChatEvent::TranscriptReplaced(self.messages.clone()));
        self.emit(ChatEvent::SessionChanged(Some(session.id)));
        Ok(())
    }

    async fn fetch_session(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> ChatResult<(SessionRecord, Vec<Message>)> {
        let session = self
            .storage
            .get_session(session_id)
            .await
            .context(PersistenceSnafu {
                stage: "load-session",
            })?
            .context(SessionNotFoundSnafu {
                stage: "load-session",
                session_id,
            })?;

        snafu::ensure!(
            session.is_owned_by(user_id),
            PermissionDeniedSnafu {
                stage: "load-session",
                session_id,
            }
        );

        let messages = self
            .storage
            .list_messages(session_id)
            .await
            .context(PersistenceSnafu {
                stage: "load-session-messages",
            })?
            .into_iter()
            .map(Message::from)
            .collect();

        Ok((session, messages))
    }

    /// Starts a fresh conversation. Persisted sessions are kept.
    pub fn reset_chat(&mut self) -> ChatResult<()> {
        if let Err(error) = self.transition(PhaseTransition::Reset, "reset-chat") {
            return Err(self.surface(error));
        }
        self.messages.clear();
        self.agent_id = self.config.agent_id;
        tracing::debug!("chat reset");
        self.emit(ChatEvent::TranscriptReplaced(Vec::new()));
        self.emit(ChatEvent::SessionChanged(None));
        Ok(())
    }

    /// Handles an externally supplied `session` value.
    ///
    /// Returns `Ok(true)` when a session was loaded and `Ok(false)` when no value was given.
    /// Malformed values are reported and dropped without touching storage.
    pub async fn open_session_param(&mut self, raw: Option<&str>) -> ChatResult<bool> {
        match parse_session_param(raw) {
            SessionParam::Absent => Ok(false),
            SessionParam::Valid(session_id) => self.load_session(session_id).await.map(|()| true),
            SessionParam::Invalid(raw) => {
                tracing::warn!(raw = %raw, "dropping malformed session parameter");
                Err(self.surface(
                    InvalidSessionParamSnafu {
                        stage: "open-session-param",
                        raw,
                    }
                    .build(),
                ))
            }
        }
    }

    /// The caller's sessions, most recently updated first.
    pub async fn list_sessions(&mut self) -> ChatResult<Vec<SessionRecord>> {
        let Some(user_id) = self.user_id else {
            return Err(self.surface(
                AuthenticationRequiredSnafu {
                    stage: "list-sessions",
                }
                .build(),
            ));
        };

        self.set_loading(true);
        let result = self
            .storage
            .list_sessions(user_id)
            .await
            .context(PersistenceSnafu {
                stage: "list-sessions",
            });
        self.set_loading(false);

        result.map_err(|error| self.surface(error))
    }

    fn transition(&mut self, transition: PhaseTransition, stage: &'static str) -> ChatResult<()> {
        self.phase = self
            .phase
            .apply(transition)
            .map_err(|rejection| PhaseRejectedSnafu { stage, rejection }.build())?;
        Ok(())
    }

    fn set_loading(&mut self, is_loading: bool) {
        if self.is_loading != is_loading {
            self.is_loading = is_loading;
            self.emit(ChatEvent::LoadingChanged(is_loading));
        }
    }

    /// Logs the failure and publishes it as a notification before handing it back.
    fn surface(&self, error: ChatError) -> ChatError {
        let kind = error.kind();
        match kind {
            ErrorKind::ValidationFailure | ErrorKind::AuthenticationRequired => {
                tracing::warn!("chat operation rejected: {error}");
            }
            _ => tracing::error!("chat operation failed: {error}"),
        }
        self.emit(ChatEvent::Notification(Notification::error(
            kind,
            error.to_string(),
        )));
        error
    }

    fn emit(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("chat event dropped, no view is listening");
        }
    }
}

fn agent_config(agent: &AgentRecord) -> AgentConfig {
    AgentConfig {
        id: agent.id.to_string(),
        name: agent.name.clone(),
        description: agent.description.clone(),
        system_prompt: agent.system_prompt.clone(),
        model: agent.model.clone(),
        temperature: agent.temperature,
        max_tokens: agent.max_tokens,
    }
}

/// Cloneable access to one controller from several tasks.
///
/// Callers queue on a fair lock, so overlapping operations run one after another
/// in the order they were issued.
#[derive(Clone)]
pub struct ChatHandle {
    controller: Arc<Mutex<ChatController>>,
}

impl ChatHandle {
    pub fn new(controller: ChatController) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ChatController> {
        self.controller.lock().await
    }

    pub async fn send_message(&self, text: &str) -> ChatResult<SendOutcome> {
        self.controller.lock().await.send_message(text).await
    }

    pub async fn load_session(&self, session_id: SessionId) -> ChatResult<()> {
        self.controller.lock().await.load_session(session_id).await
    }

    pub async fn open_session_param(&self, raw: Option<&str>) -> ChatResult<bool> {
        self.controller.lock().await.open_session_param(raw).await
    }

    pub async fn list_sessions(&self) -> ChatResult<Vec<SessionRecord>> {
        self.controller.lock().await.list_sessions().await
    }

    pub async fn reset_chat(&self) -> ChatResult<()> {
        self.controller.lock().await.reset_chat()
    }
}
