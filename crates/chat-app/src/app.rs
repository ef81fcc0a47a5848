use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parlor_llm::{ProviderError, create_generator};
use parlor_storage::{AgentId, SqliteStorage, Storage, StorageError};
use snafu::{ResultExt, Snafu};
use tokio::io::BufReader;

use crate::chat::{ChatController, ChatHandle, ControllerConfig, ConversationView};
use crate::settings::{SettingsError, SettingsStore};

/// Startup overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub config_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    /// Session to open before the first prompt.
    pub session: Option<String>,
    pub agent: Option<String>,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("settings failed on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("agent id '{raw}' is invalid: {source}"))]
    InvalidAgent {
        stage: &'static str,
        raw: String,
        source: StorageError,
    },
    #[snafu(display("agent '{agent_id}' does not exist"))]
    AgentMissing {
        stage: &'static str,
        agent_id: AgentId,
    },
    #[snafu(display("reply generator could not be created: {source}"))]
    Generator {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("terminal io failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: io::Error,
    },
}

pub async fn run(options: AppOptions) -> Result<(), AppError> {
    let settings_store = match options.config_path.clone() {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let user_id = settings_store.ensure_user_id().context(SettingsSnafu {
        stage: "resolve-user",
    })?;

    let database_path = options
        .database_path
        .clone()
        .unwrap_or_else(|| settings_store.settings().database_location());
    let storage = Arc::new(
        SqliteStorage::open(&database_path.to_string_lossy())
            .await
            .context(StorageSnafu {
                stage: "open-storage",
            })?,
    );
    tracing::info!("opened chat database at {}", storage.database_url());

    let agent_id =
        resolve_agent(&settings_store, storage.as_ref(), options.agent.as_deref()).await?;

    let settings = settings_store.settings();
    let generator = create_generator(settings.generator_config()).context(GeneratorSnafu {
        stage: "create-generator",
    })?;
    tracing::info!(generator = generator.id(), %agent_id, "chat ready");

    let (mut controller, events) = ChatController::new(
        storage,
        generator,
        ControllerConfig {
            agent_id,
            api_key: settings.api_key(),
        },
    );
    controller.sign_in(user_id);

    let handle = ChatHandle::new(controller);
    if let Err(error) = handle.open_session_param(options.session.as_deref()).await {
        tracing::debug!("startup session was not opened: {error}");
    }

    let view = ConversationView::new(handle, events, io::stdout());
    view.run(BufReader::new(tokio::io::stdin()))
        .await
        .context(TerminalSnafu {
            stage: "conversation-loop",
        })?;
    Ok(())
}

/// Picks the agent for new sessions.
///
/// An explicit id must already exist. Otherwise the configured id is used when it
/// still resolves, and a fresh agent is seeded from settings when it does not.
pub async fn resolve_agent(
    settings_store: &SettingsStore,
    storage: &dyn Storage,
    requested: Option<&str>,
) -> Result<AgentId, AppError> {
    if let Some(raw) = requested {
        let agent_id = AgentId::parse(raw).context(InvalidAgentSnafu {
            stage: "parse-requested-agent",
            raw,
        })?;
        return match storage
            .get_agent(agent_id)
            .await
            .context(StorageSnafu {
                stage: "load-requested-agent",
            })? {
            Some(agent) => Ok(agent.id),
            None => AgentMissingSnafu {
                stage: "load-requested-agent",
                agent_id,
            }
            .fail(),
        };
    }

    let settings = settings_store.settings();
    let configured = settings.agent_id().context(SettingsSnafu {
        stage: "parse-configured-agent",
    })?;
    if let Some(agent_id) = configured {
        let existing = storage.get_agent(agent_id).await.context(StorageSnafu {
            stage: "load-configured-agent",
        })?;
        if existing.is_some() {
            return Ok(agent_id);
        }
        tracing::warn!(%agent_id, "configured agent is missing, seeding a new one");
    }

    let agent = storage
        .create_agent(settings.new_agent())
        .await
        .context(StorageSnafu {
            stage: "seed-agent",
        })?;
    settings_store
        .update(|settings| settings.agent_id = Some(agent.id.to_string()))
        .context(SettingsSnafu {
            stage: "save-seeded-agent",
        })?;
    tracing::info!(agent_id = %agent.id, name = %agent.name, "seeded agent from settings");
    Ok(agent.id)
}
