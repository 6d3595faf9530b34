use kidtimer_shared::domain::CuratedActivity;
use serde::Deserialize;
use std::{env, fs, path::Path, time::Duration};

use crate::engine::EngineSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub curated_activities: Vec<CuratedActivity>,
    #[serde(default)]
    pub timers: TimerConfig,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
}

/// A parent account allowed to sign in.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub uid: String,
    pub email: String,
    pub password_hash: String, // bcrypt hash
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub checkpoint_interval_secs: u64,
    pub persist_remaining_on_pause: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_secs: 30,
            persist_remaining_on_pause: true,
        }
    }
}

impl TimerConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            persist_remaining_on_pause: self.persist_remaining_on_pause,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt_secret must not be empty".into()));
        }
        if self.timers.checkpoint_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "timers.checkpoint_interval_secs must be at least 1".into(),
            ));
        }
        for (i, u) in self.users.iter().enumerate() {
            if self.users[..i]
                .iter()
                .any(|o| o.uid == u.uid || o.email.eq_ignore_ascii_case(&u.email))
            {
                return Err(ConfigError::Invalid(format!(
                    "duplicate user uid or email: {}",
                    u.email
                )));
            }
        }
        for a in &self.curated_activities {
            if a.name.trim().is_empty() || a.category.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "curated activity {} needs a name and category",
                    a.id
                )));
            }
        }
        Ok(())
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<&UserConfig> {
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
    }
}
