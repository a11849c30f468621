use std::path::PathBuf;
use std::time::Duration;

use fieldreport_domain::schema::NumericBounds;
use fieldreport_domain::session::SessionConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub data_dir: String,
    pub export_dir: String,
    pub telegram_bot_token: String,
    pub telegram_api_base: String,
    pub telegram_poll_timeout_secs: u64,
    pub telegram_request_timeout_ms: u64,
    pub telegram_channel_id: String,
    pub admin_email: String,
    pub mail_relay_url: String,
    pub mail_relay_token: String,
    pub session_ttl_secs: u64,
    pub session_sweep_interval_ms: u64,
    pub restore_reports_on_start: bool,
    pub numeric_min: f64,
    #[serde(default)]
    pub numeric_max: Option<f64>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("data_dir", "data")?
            .set_default("export_dir", "exports")?
            .set_default("telegram_bot_token", "")?
            .set_default("telegram_api_base", "https://api.telegram.org")?
            .set_default("telegram_poll_timeout_secs", 30)?
            .set_default("telegram_request_timeout_ms", 10000)?
            .set_default("telegram_channel_id", "")?
            .set_default("admin_email", "")?
            .set_default("mail_relay_url", "")?
            .set_default("mail_relay_token", "")?
            .set_default("session_ttl_secs", 3600)?
            .set_default("session_sweep_interval_ms", 60000)?
            .set_default("restore_reports_on_start", true)?
            .set_default("numeric_min", 0.0)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn bot_enabled(&self) -> bool {
        !self.telegram_bot_token.trim().is_empty()
    }

    /// Public channel for the reduced broadcast, when configured.
    pub fn broadcast_channel(&self) -> Option<&str> {
        non_empty(&self.telegram_channel_id)
    }

    /// Admin recipient and relay endpoint. Both must be set for mail to be
    /// attempted.
    pub fn admin_mail(&self) -> Option<(&str, &str)> {
        Some((non_empty(&self.admin_email)?, non_empty(&self.mail_relay_url)?))
    }

    pub fn numeric_bounds(&self) -> NumericBounds {
        NumericBounds {
            min: self.numeric_min,
            max: self.numeric_max,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_ttl: Duration::from_secs(self.session_ttl_secs),
        }
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.session_sweep_interval_ms.max(1))
    }

    pub fn telegram_request_timeout(&self) -> Duration {
        Duration::from_millis(self.telegram_request_timeout_ms.max(1))
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn export_path(&self) -> PathBuf {
        PathBuf::from(&self.export_dir)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        log_level: "info".to_string(),
        data_dir: "data".to_string(),
        export_dir: "exports".to_string(),
        telegram_bot_token: String::new(),
        telegram_api_base: "http://127.0.0.1:1".to_string(),
        telegram_poll_timeout_secs: 0,
        telegram_request_timeout_ms: 1000,
        telegram_channel_id: String::new(),
        admin_email: String::new(),
        mail_relay_url: String::new(),
        mail_relay_token: String::new(),
        session_ttl_secs: 3600,
        session_sweep_interval_ms: 60000,
        restore_reports_on_start: true,
        numeric_min: 0.0,
        numeric_max: None,
    }
}
