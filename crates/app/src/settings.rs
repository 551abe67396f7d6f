use std::path::{Path, PathBuf};
use std::sync::Arc;

use buddy_chat::DEFAULT_FOLLOW_THRESHOLD;
use buddy_llm::{DEFAULT_ENDPOINT, DEFAULT_MODEL_ID, RuntimeConfig};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "lbrl-buddy";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "LBRL_BUDDY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuddySettings {
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Replaces the bundled FAQ corpus when set.
    #[serde(default)]
    pub faq_path: Option<PathBuf>,
    /// Skips the download consent prompt.
    #[serde(default)]
    pub auto_consent: bool,
    #[serde(default = "default_scroll_threshold")]
    pub scroll_threshold: f32,
}

impl Default for BuddySettings {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            endpoint: default_endpoint(),
            api_key: None,
            faq_path: None,
            auto_consent: false,
            scroll_threshold: default_scroll_threshold(),
        }
    }
}

impl BuddySettings {
    pub fn normalized(mut self) -> Self {
        self.model_id = if self.model_id.trim().is_empty() {
            default_model_id()
        } else {
            self.model_id.trim().to_string()
        };
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self.api_key = self
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self.faq_path = self
            .faq_path
            .filter(|path| !path.as_os_str().is_empty());
        if !self.scroll_threshold.is_finite() || self.scroll_threshold <= 0.0 {
            self.scroll_threshold = default_scroll_threshold();
        }

        self
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::new(
            self.endpoint.as_str(),
            self.api_key.as_deref().unwrap_or_default(),
        )
    }
}

/// Settings resolved once at startup from defaults, the JSON file and the
/// environment.
pub struct SettingsStore {
    settings: Arc<BuddySettings>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".lbrl-buddy"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = match layered(&config_path).extract::<BuddySettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %config_path.display(),
                    error = %error,
                    "ignoring unreadable settings"
                );
                BuddySettings::default()
            }
        };

        Self {
            settings: Arc::new(settings),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<BuddySettings> {
        Arc::clone(&self.settings)
    }

    /// Saves the resolved settings when no settings file exists yet, so the
    /// first launch leaves a file to edit.
    pub fn write_defaults_if_missing(&self) -> Result<bool, SettingsError> {
        if self.config_path.exists() {
            return Ok(false);
        }

        let json = serde_json::to_string_pretty(&*self.settings).context(EncodeSettingsSnafu {
            stage: "write-default-settings",
        })?;
        replace_file(&self.config_path, &json)?;
        tracing::info!(path = %self.config_path.display(), "default settings written");
        Ok(true)
    }
}

/// Defaults, then the JSON file, then `LBRL_BUDDY_*` variables.
///
/// A missing file contributes nothing.
fn layered(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(BuddySettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
}

/// Stages `contents` next to `path` and renames it into place.
fn replace_file(path: &Path, contents: &str) -> Result<(), SettingsError> {
    const STAGE: &str = "replace-settings-file";

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).context(CreateConfigDirSnafu { stage: STAGE, path: dir })?;
    }

    let staged = path.with_extension("json.tmp");
    std::fs::write(&staged, contents).context(WriteSettingsSnafu {
        stage: STAGE,
        path: &staged,
    })?;
    std::fs::rename(&staged, path).context(ReplaceSettingsSnafu {
        stage: STAGE,
        from: &staged,
        to: path,
    })
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot create config directory {} on `{stage}`: {source}", path.display()))]
    CreateConfigDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode settings as JSON on `{stage}`: {source}"))]
    EncodeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot write {} on `{stage}`: {source}", path.display()))]
    WriteSettings {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot move {} over {} on `{stage}`: {source}", from.display(), to.display()))]
    ReplaceSettings {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_scroll_threshold() -> f32 {
    DEFAULT_FOLLOW_THRESHOLD
}
