#![deny(unsafe_code)]

/// Startup wiring: settings, storage, generator and the terminal loop.
pub mod app;
/// Conversation controller and view.
pub mod chat;
/// Layered settings persisted as JSON.
pub mod settings;
