use parlor_llm::ProviderError;
use parlor_storage::{AgentId, SessionId, StorageError};
use snafu::Snafu;

use crate::chat::message::PhaseTransitionRejection;

/// User-facing failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthenticationRequired,
    SessionNotFound,
    AgentNotFound,
    PermissionDenied,
    PersistenceFailure,
    GenerationFailure,
    ValidationFailure,
}

impl ErrorKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "Sign-in required",
            Self::SessionNotFound => "Chat session not found",
            Self::AgentNotFound => "Agent not found",
            Self::PermissionDenied => "Permission denied",
            Self::PersistenceFailure => "Could not save chat",
            Self::GenerationFailure => "No reply from agent",
            Self::ValidationFailure => "Invalid input",
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("an authenticated user is required on `{stage}`"))]
    AuthenticationRequired { stage: &'static str },
    #[snafu(display("chat session '{session_id}' does not exist"))]
    SessionNotFound {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("agent '{agent_id}' does not exist"))]
    AgentNotFound {
        stage: &'static str,
        agent_id: AgentId,
    },
    #[snafu(display("chat session '{session_id}' belongs to another user"))]
    PermissionDenied {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("storage failed on `{stage}`: {source}"))]
    Persistence {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("reply generation failed on `{stage}`: {source}"))]
    Generation {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("session parameter '{raw}' is not a valid session id"))]
    InvalidSessionParam { stage: &'static str, raw: String },
    #[snafu(display("conversation phase rejected transition on `{stage}`: {rejection:?}"))]
    PhaseRejected {
        stage: &'static str,
        rejection: PhaseTransitionRejection,
    },
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthenticationRequired { .. } => ErrorKind::AuthenticationRequired,
            Self::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            Self::AgentNotFound { .. } => ErrorKind::AgentNotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Persistence { .. } => ErrorKind::PersistenceFailure,
            Self::Generation { .. } => ErrorKind::GenerationFailure,
            Self::InvalidSessionParam { .. } | Self::PhaseRejected { .. } => {
                ErrorKind::ValidationFailure
            }
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
