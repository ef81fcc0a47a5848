use parlor_llm::{ProviderMessage, Role as ProviderRole};
use parlor_storage::{MessageRecord, MessageRole, SessionId};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn. Never edited after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn to_provider(&self) -> ProviderMessage {
        // Keep role mapping explicit at the crate boundary so llm types stay
        // decoupled from chat domain enums.
        let role = match self.role {
            Role::User => ProviderRole::User,
            Role::Assistant => ProviderRole::Assistant,
        };
        ProviderMessage::new(role, self.content.clone())
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        let role = match record.role {
            MessageRole::User => Role::User,
            MessageRole::Assistant => Role::Assistant,
        };
        Self::new(role, record.content)
    }
}

/// Session lifecycle of one controller.
///
/// `Empty` has no persisted session yet, `SessionPending` is the window between the first
/// send and the session row being created, `Active` is bound to a persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationPhase {
    #[default]
    Empty,
    SessionPending,
    Active(SessionId),
}

/// State transition input for the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    BeginSession,
    SessionCreated(SessionId),
    SessionCreationFailed,
    SessionLoaded(SessionId),
    Reset,
}

/// Rejection reason for illegal phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransitionRejection {
    SessionAlreadyActive(SessionId),
    SessionAlreadyPending,
    NoPendingSession,
}

pub type PhaseTransitionResult = Result<ConversationPhase, PhaseTransitionRejection>;

impl ConversationPhase {
    /// Returns the bound session if and only if the phase is `Active`.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Active(session_id) => Some(*session_id),
            Self::Empty | Self::SessionPending => None,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// Only `Empty` may begin a new session; creation outcomes must follow a pending begin.
    /// Loading is refused while a creation is pending so a late insert cannot be orphaned.
    pub fn apply(&self, transition: PhaseTransition) -> PhaseTransitionResult {
        match (self, transition) {
            (_, PhaseTransition::Reset) => Ok(Self::Empty),
            (Self::Empty, PhaseTransition::BeginSession) => Ok(Self::SessionPending),
            (Self::SessionPending, PhaseTransition::BeginSession)
            | (Self::SessionPending, PhaseTransition::SessionLoaded(_)) => {
                Err(PhaseTransitionRejection::SessionAlreadyPending)
            }
            (Self::Active(active), PhaseTransition::BeginSession) => {
                Err(PhaseTransitionRejection::SessionAlreadyActive(*active))
            }
            (Self::SessionPending, PhaseTransition::SessionCreated(session_id)) => {
                Ok(Self::Active(session_id))
            }
            (Self::SessionPending, PhaseTransition::SessionCreationFailed) => Ok(Self::Empty),
            (
                Self::Empty | Self::Active(_),
                PhaseTransition::SessionCreated(_) | PhaseTransition::SessionCreationFailed,
            ) => Err(PhaseTransitionRejection::NoPendingSession),
            (Self::Empty | Self::Active(_), PhaseTransition::SessionLoaded(session_id)) => {
                Ok(Self::Active(session_id))
            }
        }
    }
}
