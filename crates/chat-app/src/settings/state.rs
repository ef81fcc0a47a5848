use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parlor_llm::{DEFAULT_OPENAI_MODEL, GeneratorConfig};
use parlor_storage::{AgentId, NewAgent, StorageError, UserId};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "parlor";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "parlor.db";
/// Environment overrides, e.g. `PARLOR_GENERATOR__API_KEY`.
pub const ENV_PREFIX: &str = "PARLOR_";
const ENV_SEPARATOR: &str = "__";

/// Persona seeded into an empty database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            description: "A helpful general-purpose assistant.".to_string(),
            system_prompt: None,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl AgentSettings {
    fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            self.name = default_agent_name();
        }
        self.description = self.description.trim().to_string();
        self.system_prompt = non_blank(self.system_prompt);
        self.model = non_blank(self.model);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            function_key: None,
            default_model: Some(DEFAULT_OPENAI_MODEL.to_string()),
        }
    }
}

impl GeneratorSettings {
    fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_string()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self.function_key = non_blank(self.function_key);
        self.default_model = non_blank(self.default_model);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Identity of the local user. Generated on first run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Agent new sessions are created with. Seeded from `agent` when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub generator: GeneratorSettings,
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        self.user_id = non_blank(self.user_id);
        self.agent_id = non_blank(self.agent_id);
        self.database_path = self
            .database_path
            .filter(|path| !path.as_os_str().is_empty());
        self.agent = self.agent.normalized();
        self.generator = self.generator.normalized();
        self
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig::new(
            &self.generator.provider_id,
            &self.generator.api_key,
            &self.generator.endpoint,
        )
        .with_function_key(self.generator.function_key.clone())
        .with_default_model(self.generator.default_model.clone())
    }

    /// Key forwarded with every generation request, if configured.
    pub fn api_key(&self) -> Option<String> {
        Some(self.generator.api_key.clone()).filter(|key| !key.is_empty())
    }

    pub fn database_location(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join(DATABASE_FILE_NAME))
    }

    pub fn user_id(&self) -> Result<Option<UserId>, SettingsError> {
        self.user_id
            .as_deref()
            .map(|raw| {
                UserId::parse(raw).context(InvalidIdentifierSnafu {
                    stage: "parse-user-id",
                    field: "user_id",
                })
            })
            .transpose()
    }

    pub fn agent_id(&self) -> Result<Option<AgentId>, SettingsError> {
        self.agent_id
            .as_deref()
            .map(|raw| {
                AgentId::parse(raw).context(InvalidIdentifierSnafu {
                    stage: "parse-agent-id",
                    field: "agent_id",
                })
            })
            .transpose()
    }

    pub fn new_agent(&self) -> NewAgent {
        NewAgent {
            name: self.agent.name.clone(),
            description: self.agent.description.clone(),
            system_prompt: self.agent.system_prompt.clone(),
            model: self.agent.model.clone(),
            temperature: self.agent.temperature,
            max_tokens: self.agent.max_tokens,
        }
    }
}

/// Live settings backed by a JSON file with environment overrides.
///
/// Only the file layer is ever written back, so values that arrive through
/// the environment (API keys in particular) never land on disk.
pub struct SettingsStore {
    file_settings: ArcSwap<AppSettings>,
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parlor"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let file_settings = Self::load_from_disk(&config_path);
        let settings = with_environment(&file_settings);
        Self {
            file_settings: ArcSwap::from_pointee(file_settings),
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Effective settings: file values overlaid with environment overrides.
    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    /// Applies `edit` to the file layer, persists it and refreshes the effective settings.
    pub fn update<F>(&self, edit: F) -> Result<Arc<AppSettings>, SettingsError>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut file_settings = AppSettings::clone(&self.file_settings.load());
        edit(&mut file_settings);
        let file_settings = file_settings.normalized();
        self.persist(&file_settings)?;

        let settings = Arc::new(with_environment(&file_settings));
        self.file_settings.store(Arc::new(file_settings));
        self.settings.store(settings.clone());
        Ok(settings)
    }

    /// Returns the configured user id, generating and saving one on first use.
    pub fn ensure_user_id(&self) -> Result<UserId, SettingsError> {
        if let Some(user_id) = self.settings().user_id()? {
            return Ok(user_id);
        }

        let user_id = UserId::new_v7();
        self.update(|settings| settings.user_id = Some(user_id.to_string()))?;
        tracing::info!(%user_id, "generated local user id");
        Ok(user_id)
    }

    fn load_from_disk(path: &Path) -> AppSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return AppSettings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(AppSettings::default())).merge(Json::file(path));

        match figment.extract::<AppSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                AppSettings::default()
            }
        }
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("settings field `{field}` is not a valid id on `{stage}`: {source}"))]
    InvalidIdentifier {
        stage: &'static str,
        field: &'static str,
        source: StorageError,
    },
}

fn with_environment(file_settings: &AppSettings) -> AppSettings {
    let figment = Figment::from(Serialized::defaults(file_settings.clone()))
        .merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR));

    match figment.extract::<AppSettings>() {
        Ok(settings) => settings.normalized(),
        Err(error) => {
            tracing::warn!("ignoring malformed {ENV_PREFIX}* environment overrides: {error}");
            file_settings.clone()
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".parlor"))
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_agent_name() -> String {
    "Assistant".to_string()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
