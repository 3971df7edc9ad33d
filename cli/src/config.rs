use crate::api::DEFAULT_SERVICE_ADDR;
use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_CONFIG_PATH: &str = "MUSICCREATOR_CONFIG_PATH";
const ENV_SERVICE_ADDR: &str = "MUSICCREATOR_SERVICE_ADDR";
const ENV_CLIP_TIMEOUT: &str = "MUSICCREATOR_CLIP_TIMEOUT";
const ENV_CLIP_PAUSE: &str = "MUSICCREATOR_CLIP_PAUSE";
const ENV_FFMPEG: &str = "MUSICCREATOR_FFMPEG";
const ENV_OUTPUT_DIR: &str = "MUSICCREATOR_OUTPUT_DIR";
const ENV_OPENROUTER_KEY: &str = "OPENROUTER_API_KEY";
const ENV_OPENROUTER_MODEL: &str = "OPENROUTER_MODEL";
const ENV_OPENROUTER_URL: &str = "OPENROUTER_URL";

pub const DEFAULT_OPENROUTER_MODEL: &str = "x-ai/grok-4-fast";
pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct AppConfig {
    service_addr: String,
    clip_timeout_seconds: u64,
    clip_pause_seconds: u64,
    ffmpeg_path: PathBuf,
    output_dir: PathBuf,
    openrouter_api_key: Option<String>,
    openrouter_model: String,
    openrouter_url: String,
}

impl AppConfig {
    /// Defaults, then the config file, then environment variables.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let path = match config_file_override() {
            Some(path) => Some(path),
            None => Self::default_config_path().ok(),
        };
        if let Some(path) = path {
            if path.exists() {
                let partial = read_partial(&path)?;
                config.apply_partial(partial);
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    pub fn service_addr(&self) -> &str {
        &self.service_addr
    }

    pub fn clip_timeout(&self) -> Duration {
        Duration::from_secs(self.clip_timeout_seconds)
    }

    pub fn clip_pause(&self) -> Duration {
        Duration::from_secs(self.clip_pause_seconds)
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn openrouter_api_key(&self) -> Option<&str> {
        self.openrouter_api_key.as_deref()
    }

    pub fn openrouter_model(&self) -> &str {
        &self.openrouter_model
    }

    pub fn openrouter_url(&self) -> &str {
        &self.openrouter_url
    }

    pub fn set_service_addr(&mut self, addr: impl Into<String>) {
        self.service_addr = addr.into();
    }

    pub fn set_clip_timeout_seconds(&mut self, seconds: u64) {
        self.clip_timeout_seconds = seconds;
    }

    pub fn set_clip_pause_seconds(&mut self, seconds: u64) {
        self.clip_pause_seconds = seconds;
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "MusicCreator", "MusicCreator")
            .ok_or_else(|| anyhow!("unable to determine config directory"))?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(addr) = partial.service_addr {
            self.service_addr = addr;
        }
        if let Some(seconds) = partial.clip_timeout_seconds {
            self.clip_timeout_seconds = seconds;
        }
        if let Some(seconds) = partial.clip_pause_seconds {
            self.clip_pause_seconds = seconds;
        }
        if let Some(path) = partial.ffmpeg_path {
            self.ffmpeg_path = path;
        }
        if let Some(dir) = partial.output_dir {
            self.output_dir = dir;
        }
        if let Some(key) = partial.openrouter_api_key {
            self.openrouter_api_key = non_empty(key);
        }
        if let Some(model) = partial.openrouter_model {
            self.openrouter_model = model;
        }
        if let Some(url) = partial.openrouter_url {
            self.openrouter_url = url;
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_value(ENV_SERVICE_ADDR) {
            self.service_addr = value;
        }
        if let Some(value) = env_value(ENV_CLIP_TIMEOUT) {
            self.clip_timeout_seconds = value
                .parse::<u64>()
                .with_context(|| format!("{ENV_CLIP_TIMEOUT} must be a whole number of seconds"))?;
        }
        if let Some(value) = env_value(ENV_CLIP_PAUSE) {
            self.clip_pause_seconds = value
                .parse::<u64>()
                .with_context(|| format!("{ENV_CLIP_PAUSE} must be a whole number of seconds"))?;
        }
        if let Some(value) = env_value(ENV_FFMPEG) {
            self.ffmpeg_path = PathBuf::from(value);
        }
        if let Some(value) = env_value(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(value);
        }
        if let Some(value) = env_value(ENV_OPENROUTER_KEY) {
            self.openrouter_api_key = Some(value);
        }
        if let Some(value) = env_value(ENV_OPENROUTER_MODEL) {
            self.openrouter_model = value;
        }
        if let Some(value) = env_value(ENV_OPENROUTER_URL) {
            self.openrouter_url = value;
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_addr: DEFAULT_SERVICE_ADDR.into(),
            clip_timeout_seconds: 600,
            clip_pause_seconds: 2,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            output_dir: PathBuf::from("outputs").join("composition"),
            openrouter_api_key: None,
            openrouter_model: DEFAULT_OPENROUTER_MODEL.into(),
            openrouter_url: DEFAULT_OPENROUTER_URL.into(),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().and_then(non_empty)
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.trim().to_string())
    }
}

fn config_file_override() -> Option<PathBuf> {
    let value = env::var_os(ENV_CONFIG_PATH)?;
    if value.is_empty() {
        return None;
    }
    let path = PathBuf::from(value);
    if path.is_dir() {
        return Some(path.join(CONFIG_FILE_NAME));
    }
    Some(path)
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    parse_partial(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

fn parse_partial(contents: &str) -> Result<PartialConfig> {
    Ok(toml::from_str(contents)?)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialConfig {
    service_addr: Option<String>,
    clip_timeout_seconds: Option<u64>,
    clip_pause_seconds: Option<u64>,
    ffmpeg_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    openrouter_api_key: Option<String>,
    openrouter_model: Option<String>,
    openrouter_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.service_addr(), "localhost:8642");
        assert_eq!(config.clip_timeout(), Duration::from_secs(600));
        assert_eq!(config.clip_pause(), Duration::from_secs(2));
        assert_eq!(config.ffmpeg_path(), Path::new("ffmpeg"));
        assert_eq!(config.output_dir(), Path::new("outputs/composition"));
        assert!(config.openrouter_api_key().is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let partial = parse_partial(
            r#"
service_addr = "studio:9000"
clip_timeout_seconds = 120
openrouter_api_key = "   "
output_dir = "/srv/music"
"#,
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.apply_partial(partial);

        assert_eq!(config.service_addr(), "studio:9000");
        assert_eq!(config.clip_timeout(), Duration::from_secs(120));
        assert_eq!(config.clip_pause(), Duration::from_secs(2));
        assert!(config.openrouter_api_key().is_none());
        assert_eq!(config.output_dir(), Path::new("/srv/music"));
    }

    #[test]
    fn rejects_unknown_types() {
        assert!(parse_partial("clip_timeout_seconds = \"soon\"").is_err());
    }
}
