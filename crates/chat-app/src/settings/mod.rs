pub mod state;

pub use state::{AgentSettings, AppSettings, GeneratorSettings, SettingsError, SettingsStore};
