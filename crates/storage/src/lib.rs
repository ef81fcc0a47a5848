use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{AgentId, MessageId, SessionId, UserId};
pub use sqlite::SqliteStorage;
pub use types::{
    AgentRecord, DEFAULT_SESSION_TITLE, MessageRecord, MessageRole, NewAgent, NewMessage,
    NewSession, SESSION_TITLE_MAX_CHARS, SessionPatch, SessionRecord, derive_session_title,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait SessionStore: Send + Sync {
    fn create_session<'a>(
        &'a self,
        input: NewSession,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>>;
    fn get_session<'a>(
        &'a self,
        session_id: SessionId,
    ) -> BoxFuture<'a, StorageResult<Option<SessionRecord>>>;
    /// Sessions owned by `owner_id`, most recently updated first.
    fn list_sessions<'a>(
        &'a self,
        owner_id: UserId,
    ) -> BoxFuture<'a, StorageResult<Vec<SessionRecord>>>;
    fn update_session<'a>(
        &'a self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> BoxFuture<'a, StorageResult<SessionRecord>>;
    /// Bumps `updated_at` without changing any other column.
    fn touch_session<'a>(&'a self, session_id: SessionId) -> BoxFuture<'a, StorageResult<()>>;
}

pub trait MessageStore: Send + Sync {
    fn append_message<'a>(
        &'a self,
        session_id: SessionId,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<MessageRecord>>;
    /// Messages of one session in creation order.
    fn list_messages<'a>(
        &'a self,
        session_id: SessionId,
    ) -> BoxFuture<'a, StorageResult<Vec<MessageRecord>>>;
}

pub trait AgentStore: Send + Sync {
    fn create_agent<'a>(&'a self, input: NewAgent) -> BoxFuture<'a, StorageResult<AgentRecord>>;
    fn get_agent<'a>(
        &'a self,
        agent_id: AgentId,
    ) -> BoxFuture<'a, StorageResult<Option<AgentRecord>>>;
    fn list_agents<'a>(&'a self) -> BoxFuture<'a, StorageResult<Vec<AgentRecord>>>;
}

pub trait Storage: SessionStore + MessageStore + AgentStore {}

impl<T> Storage for T where T: SessionStore + MessageStore + AgentStore {}
