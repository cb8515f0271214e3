//! Test plan for the `casa-config` crate.
//!
//! These tests exercise the configuration loader across default handling,
//! file discovery, environment overrides, and validation behaviour.

use std::fs;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;

use casa_config::{load, ApiConfig, AppConfig, ChannelMode, ChatConfig, RealtimeConfig};

const ENV_VARS_TO_RESET: &[&str] = &[
    "CASA_CONFIG",
    "CASA__API__BASE_URL",
    "CASA__API__REQUEST_TIMEOUT_SECONDS",
    "CASA__REALTIME__URL",
    "CASA__REALTIME__MODE",
    "CASA__REALTIME__CHANNEL_CAPACITY",
    "CASA__CHAT__RECONCILE_WINDOW_MS",
    "CASA__CHAT__HISTORY_PAGE_SIZE",
];

struct TestContext {
    vars: Vec<(String, Option<String>)>,
    original_dir: Option<PathBuf>,
}

impl TestContext {
    fn new() -> Self {
        Self {
            vars: Vec::new(),
            original_dir: None,
        }
    }

    fn reset_environment(&mut self) {
        for key in ENV_VARS_TO_RESET {
            self.remove_var(key);
        }
    }

    fn set_var(&mut self, key: &str, value: impl AsRef<str>) {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value.as_ref());
        self.vars.push((key.to_string(), previous));
    }

    fn remove_var(&mut self, key: &str) {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        self.vars.push((key.to_string(), previous));
    }

    fn set_current_dir(&mut self, dir: &Path) {
        if self.original_dir.is_none() {
            self.original_dir =
                Some(std::env::current_dir().expect("failed to capture current directory"));
        }
        std::env::set_current_dir(dir).expect("failed to set current directory");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(original) = self.original_dir.take() {
            let _ = std::env::set_current_dir(original);
        }

        while let Some((key, value)) = self.vars.pop() {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }
    }
}

fn write_config_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create config directories");
    }
    fs::write(path, contents).expect("failed to write config file");
}

fn isolated() -> (TempDir, TestContext) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());
    (temp_dir, ctx)
}

#[test]
#[serial]
fn load_uses_default_values_when_no_files_found() {
    let (_dir, _ctx) = isolated();

    let config = load().expect("configuration load should succeed without files");
    let defaults = AppConfig::default();

    assert_eq!(config.api.base_url, defaults.api.base_url);
    assert_eq!(
        config.api.request_timeout_seconds,
        defaults.api.request_timeout_seconds
    );
    assert_eq!(config.realtime.url, defaults.realtime.url);
    assert_eq!(config.realtime.mode, ChannelMode::PerConversation);
    assert_eq!(config.chat.reconcile_window_ms, defaults.chat.reconcile_window_ms);
    assert_eq!(config.chat.history_page_size, defaults.chat.history_page_size);
}

#[test]
#[serial]
fn load_picks_first_available_file_in_search_order() {
    let (dir, _ctx) = isolated();

    write_config_file(
        dir.path(),
        "casa.toml",
        r#"
        [chat]
        reconcile_window_ms = 4242
        "#,
    );
    write_config_file(
        dir.path(),
        "config/casa.toml",
        r#"
        [chat]
        reconcile_window_ms = 5151
        "#,
    );

    let config = load().expect("configuration load should pick the first file");
    assert_eq!(config.chat.reconcile_window_ms, 4242);
}

#[test]
#[serial]
fn load_merges_partial_file_with_defaults() {
    let (dir, _ctx) = isolated();

    write_config_file(
        dir.path(),
        "casa.toml",
        r#"
        [api]
        base_url = "https://imoveis.example.com/api"

        [realtime]
        mode = "multiplexed"
        "#,
    );

    let config = load().expect("configuration load should succeed");
    let defaults = AppConfig::default();

    assert_eq!(config.api.base_url, "https://imoveis.example.com/api");
    assert_eq!(
        config.api.request_timeout_seconds,
        defaults.api.request_timeout_seconds
    );
    assert_eq!(config.realtime.mode, ChannelMode::Multiplexed);
    assert_eq!(config.realtime.url, defaults.realtime.url);
    assert_eq!(config.chat.history_page_size, defaults.chat.history_page_size);
}

#[test]
#[serial]
fn load_applies_environment_overrides() {
    let (dir, mut ctx) = isolated();

    write_config_file(
        dir.path(),
        "casa.toml",
        r#"
        [api]
        request_timeout_seconds = 30
        "#,
    );

    ctx.set_var("CASA__API__REQUEST_TIMEOUT_SECONDS", "5");
    ctx.set_var("CASA__REALTIME__MODE", "multiplexed");

    let config = load().expect("configuration load should honour env overrides");
    assert_eq!(config.api.request_timeout_seconds, 5);
    assert_eq!(config.realtime.mode, ChannelMode::Multiplexed);
}

#[test]
#[serial]
fn load_reads_explicit_config_path() {
    let (dir, mut ctx) = isolated();

    write_config_file(
        dir.path(),
        "elsewhere/client.toml",
        r#"
        [realtime]
        url = "wss://realtime.example.com/socket"
        "#,
    );
    let path = dir.path().join("elsewhere/client.toml");
    ctx.set_var("CASA_CONFIG", path.display().to_string());

    let config = load().expect("configuration load should read CASA_CONFIG");
    assert_eq!(config.realtime.url, "wss://realtime.example.com/socket");
}

#[test]
#[serial]
fn load_raises_zero_channel_capacity_to_one() {
    let (_dir, mut ctx) = isolated();

    ctx.set_var("CASA__REALTIME__CHANNEL_CAPACITY", "0");

    let config = load().expect("configuration load should succeed");
    assert_eq!(config.realtime.channel_capacity, 1);
}

#[test]
#[serial]
fn load_errors_on_unknown_channel_mode() {
    let (_dir, mut ctx) = isolated();

    ctx.set_var("CASA__REALTIME__MODE", "broadcast");

    let error = load().expect_err("unknown channel mode should fail");
    assert!(error.to_string().contains("invalid configuration"));
}

#[test]
#[serial]
fn load_errors_on_invalid_toml_contents() {
    let (dir, _ctx) = isolated();

    write_config_file(
        dir.path(),
        "casa.toml",
        r#"
        [api]
        request_timeout_seconds = "not-a-number
        "#,
    );

    let error = load().expect_err("invalid TOML should cause load to fail");
    let message = error.to_string();
    assert!(
        message.contains("invalid configuration") || message.contains("unable to build configuration"),
        "unexpected error message: {message}"
    );
}

#[test]
fn chat_config_defaults_match_expected_values() {
    let defaults = ChatConfig::default();
    assert_eq!(defaults.reconcile_window_ms, 30_000);
    assert_eq!(defaults.history_page_size, 200);
}

#[test]
fn api_and_realtime_defaults_point_at_localhost() {
    assert_eq!(ApiConfig::default().base_url, "http://127.0.0.1:7070/api");
    assert_eq!(RealtimeConfig::default().url, "ws://127.0.0.1:7070/realtime");
}
