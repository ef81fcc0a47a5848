use std::future::Future;
use std::io::{self, Write};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::chat::controller::ChatHandle;
use crate::chat::events::{ChatEvent, Notification, NotificationLevel};
use crate::chat::message::{Message, Role};

const HELP: &str = "commands: /new  /load <session-id>  /sessions  /help  /quit";
const LOAD_USAGE: &str = "usage: /load <session-id>";

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    Send(String),
    New,
    Load(String),
    Sessions,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub fn parse_command(line: &str) -> ViewCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ViewCommand::Empty;
    }
    if !trimmed.starts_with('/') {
        return ViewCommand::Send(line.to_string());
    }

    let (name, argument) = match trimmed.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (trimmed, ""),
    };
    match name {
        "/new" => ViewCommand::New,
        "/load" => ViewCommand::Load(argument.to_string()),
        "/sessions" => ViewCommand::Sessions,
        "/help" => ViewCommand::Help,
        "/quit" | "/exit" => ViewCommand::Quit,
        _ => ViewCommand::Unknown(name.to_string()),
    }
}

/// Line-oriented terminal front end.
///
/// Everything it prints comes from [`ChatEvent`]s, so output keeps flowing while an
/// operation holds the controller.
pub struct ConversationView<W> {
    handle: ChatHandle,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    out: W,
}

impl<W: Write> ConversationView<W> {
    pub fn new(handle: ChatHandle, events: mpsc::UnboundedReceiver<ChatEvent>, out: W) -> Self {
        Self {
            handle,
            events,
            out,
        }
    }

    /// Reads commands until `/quit` or end of input and hands the writer back.
    pub async fn run<R>(mut self, input: R) -> io::Result<W>
    where
        R: AsyncBufRead + Unpin,
    {
        writeln!(self.out, "{HELP}")?;
        self.drain_events()?;

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let handle = self.handle.clone();
            match parse_command(&line) {
                ViewCommand::Empty => {}
                ViewCommand::Send(text) => {
                    if let Err(error) = self.drive(handle.send_message(&text)).await? {
                        tracing::debug!("send finished with error: {error}");
                    }
                }
                ViewCommand::New => {
                    if let Err(error) = self.drive(handle.reset_chat()).await? {
                        tracing::debug!("reset finished with error: {error}");
                    }
                }
                ViewCommand::Load(raw) if raw.is_empty() => writeln!(self.out, "{LOAD_USAGE}")?,
                ViewCommand::Load(raw) => {
                    if let Err(error) = self.drive(handle.open_session_param(Some(&raw))).await? {
                        tracing::debug!("load finished with error: {error}");
                    }
                }
                ViewCommand::Sessions => {
                    if let Ok(sessions) = self.drive(handle.list_sessions()).await? {
                        if sessions.is_empty() {
                            writeln!(self.out, "no saved sessions")?;
                        }
                        for session in sessions {
                            writeln!(self.out, "{}  {}", session.id, session.title)?;
                        }
                    }
                }
                ViewCommand::Help => writeln!(self.out, "{HELP}")?,
                ViewCommand::Unknown(name) => {
                    writeln!(self.out, "unknown command {name}. {HELP}")?;
                }
                ViewCommand::Quit => break,
            }
            self.out.flush()?;
        }

        self.out.flush()?;
        Ok(self.out)
    }

    /// Polls `operation` to completion, rendering events as they arrive.
    async fn drive<F>(&mut self, operation: F) -> io::Result<F::Output>
    where
        F: Future,
    {
        let mut operation = std::pin::pin!(operation);
        loop {
            tokio::select! {
                output = &mut operation => {
                    self.drain_events()?;
                    return Ok(output);
                }
                Some(event) = self.events.recv() => {
                    self.render_event(&event)?;
                    self.out.flush()?;
                }
            }
        }
    }

    fn drain_events(&mut self) -> io::Result<()> {
        while let Ok(event) = self.events.try_recv() {
            self.render_event(&event)?;
        }
        Ok(())
    }

    fn render_event(&mut self, event: &ChatEvent) -> io::Result<()> {
        match event {
            ChatEvent::MessageAppended(message) => self.render_message(message),
            ChatEvent::TranscriptReplaced(messages) if messages.is_empty() => {
                writeln!(self.out, "-- new conversation --")
            }
            ChatEvent::TranscriptReplaced(messages) => {
                writeln!(self.out, "-- {} messages --", messages.len())?;
                messages
                    .iter()
                    .try_for_each(|message| self.render_message(message))
            }
            ChatEvent::SessionChanged(Some(session_id)) => {
                writeln!(self.out, "[session {session_id}]")
            }
            ChatEvent::SessionChanged(None) => Ok(()),
            ChatEvent::LoadingChanged(true) => writeln!(self.out, "..."),
            ChatEvent::LoadingChanged(false) => Ok(()),
            ChatEvent::Notification(notification) => self.render_notification(notification),
        }
    }

    fn render_message(&mut self, message: &Message) -> io::Result<()> {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "agent",
        };
        writeln!(self.out, "{speaker}: {}", message.content)
    }

    fn render_notification(&mut self, notification: &Notification) -> io::Result<()> {
        let level = match notification.level {
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
        };
        writeln!(
            self.out,
            "[{level}] {}: {}",
            notification.title, notification.message
        )
    }
}
