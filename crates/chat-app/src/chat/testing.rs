//! In-process fakes for the storage and generation seams.

use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parlor_llm::{
    BoxFuture, GenerationRequest, GenerationResponse, ProviderError, ProviderResult, ReplyGenerator,
};
use parlor_storage::{
    AgentId, AgentRecord, AgentStore, MessageId, MessageRecord, MessageRole, MessageStore, NewAgent,
    NewMessage, NewSession, SessionId, SessionPatch, SessionRecord, SessionStore, StorageError,
    StorageResult, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateSession,
    AppendUserMessage,
    AppendAssistantMessage,
    GetAgent,
    ListMessages,
}

#[derive(Default)]
struct MemoryState {
    sessions: Vec<SessionRecord>,
    messages: Vec<MessageRecord>,
    agents: Vec<AgentRecord>,
}

#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    failures: Mutex<HashSet<FailPoint>>,
    calls: AtomicUsize,
    clock: AtomicU64,
}

impl MemoryStorage {
    pub fn fail_at(&self, point: FailPoint) {
        self.failures.lock().unwrap().insert(point);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn persisted(&self, session_id: SessionId) -> Vec<MessageRecord> {
        let state = self.state.lock().unwrap();
        state
            .messages
            .iter()
            .filter(|message| message.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Inserts a session with history directly, bypassing call accounting.
    pub fn seed_session(
        &self,
        agent_id: AgentId,
        owner_id: UserId,
        history: &[(MessageRole, &str)],
    ) -> SessionId {
        let session_id = SessionId::new_v7();
        let now = self.tick();
        let mut state = self.state.lock().unwrap();
        state.sessions.push(SessionRecord {
            id: session_id,
            agent_id,
            owner_id,
            title: "seeded".to_string(),
            created_at_unix_millis: now,
            updated_at_unix_millis: now,
        });
        for (index, (role, content)) in history.iter().enumerate() {
            state.messages.push(MessageRecord {
                id: MessageId::new_v7(),
                session_id,
                seq: index as u64 + 1,
                role: *role,
                content: (*content).to_string(),
                created_at_unix_millis: now,
            });
        }
        session_id
    }

    pub fn seed_agent(&self, name: &str) -> AgentRecord {
        let agent = AgentRecord {
            id: AgentId::new_v7(),
            name: name.to_string(),
            description: format!("{name} description"),
            system_prompt: Some(format!("You are {name}.")),
            model: None,
            temperature: Some(0.3),
            max_tokens: None,
            created_at_unix_millis: self.tick(),
        };
        self.state.lock().unwrap().agents.push(agent.clone());
        agent
    }

    fn enter(&self, point: Option<FailPoint>, stage: &'static str) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match point {
            Some(point) if self.failures.lock().unwrap().contains(&point) => {
                Err(StorageError::InvariantViolation {
                    stage,
                    details: format!("injected failure at {point:?}"),
                })
            }
            _ => Ok(()),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl SessionStore for MemoryStorage {
    fn create_session<'a>(
        &'a self,
        input: NewSession,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>> {
        Box::pin(async move {
            self.enter(Some(FailPoint::CreateSession), "memory-create-session")?;
            let now = self.tick();
            let record = SessionRecord {
                id: SessionId::new_v7(),
                agent_id: input.agent_id,
                owner_id: input.owner_id,
                title: input.title,
                created_at_unix_millis: now,
                updated_at_unix_millis: now,
            };
            self.state.lock().unwrap().sessions.push(record.clone());
            Ok(record)
        })
    }

    fn get_session<'a>(
        &'a self,
        session_id: SessionId,
    ) -> BoxFuture<'a, StorageResult<Option<SessionRecord>>> {
        Box::pin(async move {
            self.enter(None, "memory-get-session")?;
            let state = self.state.lock().unwrap();
            Ok(state
                .sessions
                .iter()
                .find(|session| session.id == session_id)
                .cloned())
        })
    }

    fn list_sessions<'a>(
        &'a self,
        owner_id: UserId,
    ) -> BoxFuture<'a, StorageResult<Vec<SessionRecord>>> {
        Box::pin(async move {
            self.enter(None, "memory-list-sessions")?;
            let state = self.state.lock().unwrap();
            let mut sessions = state
                .sessions
                .iter()
                .filter(|session| session.owner_id == owner_id)
                .cloned()
                .collect::<Vec<_>>();
            sessions.sort_by_key(|session| Reverse(session.updated_at_unix_millis));
            Ok(sessions)
        })
    }

    fn update_session<'a>(
        &'a self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>> {
        Box::pin(async move {
            self.enter(None, "memory-update-session")?;
            let now = self.tick();
            let mut state = self.state.lock().unwrap();
            let session = state
                .sessions
                .iter_mut()
                .find(|session| session.id == session_id)
                .ok_or_else(|| StorageError::NotFound {
                    stage: "memory-update-session",
                    entity: "session",
                    id: session_id.to_string(),
                })?;
            if let Some(title) = patch.title {
                session.title = title;
            }
            session.updated_at_unix_millis = now;
            Ok(session.clone())
        })
    }

    fn touch_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.update_session(session_id, SessionPatch::default())
                .await
                .map(|_| ())
        })
    }
}

impl MessageStore for MemoryStorage {
    fn append_message<'a>(
        &'a self,
        session_id: SessionId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>> {
        Box::pin(async move {
            let point = match input.role {
                MessageRole::User => FailPoint::AppendUserMessage,
                MessageRole::Assistant => FailPoint::AppendAssistantMessage,
            };
            self.enter(Some(point), "memory-append-message")?;
            let now = self.tick();
            let mut state = self.state.lock().unwrap();
            if !state.sessions.iter().any(|known| known.id == session_id) {
                return Err(StorageError::NotFound {
                    stage: "memory-append-message",
                    entity: "session",
                    id: session_id.to_string(),
                });
            }
            let seq = state
                .messages
                .iter()
                .filter(|message| message.session_id == session_id)
                .count() as u64
                + 1;
            let record = MessageRecord {
                id: MessageId::new_v7(),
                session_id,
                seq,
                role: input.role,
                content: input.content,
                created_at_unix_millis: now,
            };
            state.messages.push(record.clone());
            Ok(record)
        })
    }

    fn list_messages<'a>(
        &'a self,
        session_id: SessionId,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            self.enter(Some(FailPoint::ListMessages), "memory-list-messages")?;
            let mut messages = self.persisted(session_id);
            messages.sort_by_key(|message| message.seq);
            Ok(messages)
        })
    }
}

impl AgentStore for MemoryStorage {
    fn create_agent<'a>(&'a self, input: NewAgent) -> BoxFuture<'a, StorageResult<AgentRecord>> {
        Box::pin(async move {
            self.enter(None, "memory-create-agent")?;
            let record = AgentRecord {
                id: AgentId::new_v7(),
                name: input.name,
                description: input.description,
                system_prompt: input.system_prompt,
                model: input.model,
                temperature: input.temperature,
                max_tokens: input.max_tokens,
                created_at_unix_millis: self.tick(),
            };
            self.state.lock().unwrap().agents.push(record.clone());
            Ok(record)
        })
    }

    fn get_agent<'a>(
        &'a self,
        agent_id: AgentId,
    ) -> BoxFuture<'a, StorageResult<Option<AgentRecord>>> {
        Box::pin(async move {
            self.enter(Some(FailPoint::GetAgent), "memory-get-agent")?;
            let state = self.state.lock().unwrap();
            let agent = state.agents.iter().find(|agent| agent.id == agent_id);
            Ok(agent.cloned())
        })
    }

    fn list_agents<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<AgentRecord>>> {
        Box::pin(async move {
            self.enter(None, "memory-list-agents")?;
            Ok(self.state.lock().unwrap().agents.clone())
        })
    }
}

/// Generator that answers from a script and records every request.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Option<String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn replying(replies: &[&str]) -> Self {
        let replies = replies.iter().map(|text| Some(text.to_string()));
        Self {
            replies: Mutex::new(replies.collect()),
            ..Self::default()
        }
    }

    /// Every call fails with a missing reply.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ReplyGenerator for ScriptedGenerator {
    fn id(&self) -> &str {
        "scripted"
    }

    fn generate<'a>(
        &'a self,
        request: GenerationRequest,
    ) -> BoxFuture<'a, ProviderResult<GenerationResponse>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let reply = self.replies.lock().unwrap().pop_front().flatten();
            match reply {
                Some(generated_text) => Ok(GenerationResponse { generated_text }),
                None => Err(ProviderError::MissingReply {
                    stage: "scripted-generate",
                    provider_id: "scripted".to_string(),
                }),
            }
        })
    }
}
