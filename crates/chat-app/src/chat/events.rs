use parlor_storage::SessionId;

use crate::chat::error::ErrorKind;
use crate::chat::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationLevel {
    Warning,
    Error,
}

/// Non-fatal, user-visible message raised by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        let level = match kind {
            ErrorKind::ValidationFailure | ErrorKind::AuthenticationRequired => {
                NotificationLevel::Warning
            }
            _ => NotificationLevel::Error,
        };
        Self {
            level,
            title: kind.title().to_string(),
            message: message.into(),
        }
    }
}

/// State changes published by the controller for views to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    MessageAppended(Message),
    /// The whole transcript changed, after a load or a reset.
    TranscriptReplaced(Vec<Message>),
    SessionChanged(Option<SessionId>),
    LoadingChanged(bool),
    Notification(Notification),
}
