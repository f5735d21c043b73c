// Configuration loading - Layered settings for server, backend and stream
use crate::application::dashboard_service::DashboardSettings;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;
use std::time::Duration;

const CONFIG_FILE: &str = "config/dashboard";
const ENV_PREFIX: &str = "DASHBOARD";

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub server: ServerSettings,
    pub backend: BackendSettings,
    pub stream: StreamSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind_address: String,
    /// Where clients are sent when the backend rejects our token
    pub login_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendSettings {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    pub prediction_poll_interval_ms: u64,
    pub prediction_max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamSettings {
    pub capacity: usize,
    pub poll_interval_ms: u64,
    pub animation_tick_ms: u64,
}

impl StreamSettings {
    pub fn to_dashboard_settings(&self) -> DashboardSettings {
        DashboardSettings {
            capacity: self.capacity.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            animation_tick: Duration::from_millis(self.animation_tick_ms),
        }
    }
}

impl BackendSettings {
    pub fn prediction_poll_interval(&self) -> Duration {
        Duration::from_millis(self.prediction_poll_interval_ms)
    }
}

fn defaults() -> anyhow::Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        .set_default("server.bind_address", "0.0.0.0:8080")?
        .set_default("server.login_url", "/login")?
        .set_default("backend.base_url", "http://localhost:5000")?
        .set_default("backend.prediction_poll_interval_ms", 1000)?
        .set_default("backend.prediction_max_attempts", 30)?
        .set_default("stream.capacity", 20)?
        .set_default("stream.poll_interval_ms", 2500)?
        .set_default("stream.animation_tick_ms", 1000)?)
}

/// Defaults, then `config/dashboard.*` if present, then `DASHBOARD__*` variables.
pub fn load_dashboard_config() -> anyhow::Result<DashboardConfig> {
    let settings = defaults()?
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
