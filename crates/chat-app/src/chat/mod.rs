//! Conversation state, its controller and the terminal view.

pub mod controller;
pub mod error;
pub mod events;
pub mod message;
pub mod session_param;
#[cfg(test)]
pub(crate) mod testing;
pub mod view;

pub use controller::{ChatController, ChatHandle, ControllerConfig, SendOutcome};
pub use error::{ChatError, ChatResult, ErrorKind};
pub use events::{ChatEvent, Notification, NotificationLevel};
pub use message::{ConversationPhase, Message, PhaseTransition, PhaseTransitionRejection, Role};
pub use session_param::{SessionParam, parse_session_param};
pub use view::{ConversationView, ViewCommand, parse_command};
