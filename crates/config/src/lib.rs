use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "casa.toml",
    "config/casa.toml",
    "crates/config/casa.toml",
    "../casa.toml",
    "../config/casa.toml",
    "../crates/config/casa.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub chat: ChatConfig,
}

/// Request/response boundary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "ApiConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ApiConfig {
    const fn default_request_timeout() -> u64 {
        15
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7070/api".to_string(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

/// How inbound events are fanned in from the publish/subscribe boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// One topic per known conversation id.
    #[default]
    PerConversation,
    /// A single per-user topic; each event carries its conversation id.
    Multiplexed,
}

/// Publish/subscribe boundary settings.
///
/// ```
/// use casa_config::{ChannelMode, RealtimeConfig};
///
/// let realtime = RealtimeConfig::default();
/// assert_eq!(realtime.mode, ChannelMode::PerConversation);
/// assert_eq!(realtime.channel_capacity, 256);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub url: String,
    #[serde(default)]
    pub mode: ChannelMode,
    #[serde(default = "RealtimeConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl RealtimeConfig {
    const fn default_channel_capacity() -> usize {
        256
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:7070/realtime".to_string(),
            mode: ChannelMode::default(),
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Maximum distance between a pending entry and a confirmation for the
    /// sender/content fallback match.
    #[serde(default = "ChatConfig::default_reconcile_window")]
    pub reconcile_window_ms: u64,
    #[serde(default = "ChatConfig::default_history_page_size")]
    pub history_page_size: u32,
}

impl ChatConfig {
    const fn default_reconcile_window() -> u64 {
        30_000
    }

    const fn default_history_page_size() -> u32 {
        200
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            reconcile_window_ms: Self::default_reconcile_window(),
            history_page_size: Self::default_history_page_size(),
        }
    }
}

/// Load the client configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use casa_config::load;
///
/// std::env::remove_var("CASA_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.api.base_url.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("api.base_url", defaults.api.base_url.clone())?
        .set_default(
            "api.request_timeout_seconds",
            i64::try_from(defaults.api.request_timeout_seconds).unwrap_or(i64::MAX),
        )?
        .set_default("realtime.url", defaults.realtime.url.clone())?
        .set_default("realtime.mode", "per_conversation")?
        .set_default(
            "realtime.channel_capacity",
            i64::try_from(defaults.realtime.channel_capacity).unwrap_or(i64::MAX),
        )?
        .set_default(
            "chat.reconcile_window_ms",
            i64::try_from(defaults.chat.reconcile_window_ms).unwrap_or(i64::MAX),
        )?
        .set_default(
            "chat.history_page_size",
            i64::from(defaults.chat.history_page_size),
        )?;

    let environment_overrides = config::Environment::with_prefix("CASA").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("CASA_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via CASA_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    // tokio broadcast channels reject a zero capacity
    if config.realtime.channel_capacity == 0 {
        config.realtime.channel_capacity = 1;
    }

    debug!(?config, "loaded client configuration");
    Ok(config)
}
