use super::ids::{AgentId, MessageId, SessionId, UserId};

/// Title used when the first message yields nothing printable.
pub const DEFAULT_SESSION_TITLE: &str = "New Conversation";

/// Upper bound on derived session titles, in characters.
pub const SESSION_TITLE_MAX_CHARS: usize = 50;

/// Storage-local message role, intentionally decoupled from controller-layer role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub owner_id: UserId,
    pub title: String,
    pub created_at_unix_millis: u64,
    pub updated_at_unix_millis: u64,
}

impl SessionRecord {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub agent_id: AgentId,
    pub owner_id: UserId,
    pub title: String,
}

impl NewSession {
    /// Builds a session whose title is derived from the opening message.
    pub fn from_first_message(agent_id: AgentId, owner_id: UserId, first_message: &str) -> Self {
        Self {
            agent_id,
            owner_id,
            title: derive_session_title(first_message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub session_id: SessionId,
    pub seq: u64,
    pub role: MessageRole,
    pub content: String,
    pub created_at_unix_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Persona configuration handed to the generation function.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub id: AgentId,
    pub name: String,
    pub description: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub created_at_unix_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewAgent {
    pub name: String,
    pub description: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

/// Collapses whitespace and truncates to [`SESSION_TITLE_MAX_CHARS`] characters.
pub fn derive_session_title(first_message: &str) -> String {
    let collapsed = first_message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_SESSION_TITLE.to_string();
    }

    collapsed.chars().take(SESSION_TITLE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_collapses_whitespace() {
        assert_eq!(derive_session_title("  hello \n  there\t"), "hello there");
    }

    #[test]
    fn title_is_truncated_on_char_boundaries() {
        let long = "é".repeat(80);
        let title = derive_session_title(&long);
        assert_eq!(title.chars().count(), SESSION_TITLE_MAX_CHARS);
    }

    #[test]
    fn blank_message_falls_back_to_default_title() {
        assert_eq!(derive_session_title(" \n "), DEFAULT_SESSION_TITLE);
    }
}
