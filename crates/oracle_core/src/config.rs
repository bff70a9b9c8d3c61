use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::{controller::ControllerOptions, scheduler::RevealTiming};

pub const DEFAULT_SETTINGS_FILE: &str = "oracle.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub tenant: String,
    pub reveal_interval_ms: u64,
    pub grid_lead_ms: u64,
    pub settle_ms: u64,
    pub stream_idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub token_ttl_secs: u64,
    pub access_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".into(),
            tenant: "root".into(),
            reveal_interval_ms: 1000,
            grid_lead_ms: 50,
            settle_ms: 1000,
            stream_idle_timeout_secs: 30,
            connect_timeout_secs: 10,
            token_ttl_secs: 300,
            access_token: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    tenant: Option<String>,
    reveal_interval_ms: Option<u64>,
    grid_lead_ms: Option<u64>,
    settle_ms: Option<u64>,
    stream_idle_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    token_ttl_secs: Option<u64>,
    access_token: Option<String>,
}

impl Settings {
    pub fn api_url(&self) -> anyhow::Result<Url> {
        Url::parse(self.api_url.trim())
            .with_context(|| format!("invalid api_url '{}'", self.api_url))
    }

    pub fn timing(&self) -> RevealTiming {
        RevealTiming {
            interval: Duration::from_millis(self.reveal_interval_ms),
            grid_lead: Duration::from_millis(self.grid_lead_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            timing: self.timing(),
            stream_idle_timeout: (self.stream_idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.stream_idle_timeout_secs)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Defaults, then `oracle.toml` in the working directory, then the environment.
pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
        apply_file(&mut settings, file_cfg);
    }

    apply_env(&mut settings, env);
    settings.api_url()?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_url {
        settings.api_url = v;
    }
    if let Some(v) = file_cfg.tenant {
        settings.tenant = v;
    }
    if let Some(v) = file_cfg.reveal_interval_ms {
        settings.reveal_interval_ms = v;
    }
    if let Some(v) = file_cfg.grid_lead_ms {
        settings.grid_lead_ms = v;
    }
    if let Some(v) = file_cfg.settle_ms {
        settings.settle_ms = v;
    }
    if let Some(v) = file_cfg.stream_idle_timeout_secs {
        settings.stream_idle_timeout_secs = v;
    }
    if let Some(v) = file_cfg.connect_timeout_secs {
        settings.connect_timeout_secs = v;
    }
    if let Some(v) = file_cfg.token_ttl_secs {
        settings.token_ttl_secs = v;
    }
    if let Some(v) = file_cfg.access_token {
        settings.access_token = Some(v);
    }
}

fn apply_env(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("ORACLE_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = env("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = env("ORACLE_TENANT") {
        settings.tenant = v;
    }
    if let Some(v) = env("APP__TENANT") {
        settings.tenant = v;
    }

    if let Some(v) = env("ORACLE_ACCESS_TOKEN") {
        settings.access_token = Some(v);
    }

    parse_into(&env, "APP__REVEAL_INTERVAL_MS", &mut settings.reveal_interval_ms);
    parse_into(&env, "APP__GRID_LEAD_MS", &mut settings.grid_lead_ms);
    parse_into(&env, "APP__SETTLE_MS", &mut settings.settle_ms);
    parse_into(
        &env,
        "APP__STREAM_IDLE_TIMEOUT_SECS",
        &mut settings.stream_idle_timeout_secs,
    );
    parse_into(&env, "APP__CONNECT_TIMEOUT_SECS", &mut settings.connect_timeout_secs);
    parse_into(&env, "APP__TOKEN_TTL_SECS", &mut settings.token_ttl_secs);
}

fn parse_into(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut u64) {
    if let Some(v) = env(key) {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            *slot = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
