use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::ConnectionSettings;

pub const DEFAULT_WS_URL: &str = "wss://primegrow-server.onrender.com";
pub const DEFAULT_API_URL: &str = "https://primegrow-server.onrender.com";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "PrimeGrow device-state synchronization service", version)]
#[serde(rename_all = "camelCase")]
pub struct GrowConfig {
    #[clap(long, env = "GROW_WS_URL", help = "Telemetry/control WebSocket endpoint.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "GROW_API_URL", help = "REST API base URL for snapshot fetches.")]
    pub api_url: Option<String>,

    #[clap(long, env = "GROW_API_TOKEN", help = "Bearer credential for the REST API.")]
    pub api_token: Option<String>,

    #[clap(long, env = "GROW_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "GROW_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "GROW_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "GROW_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds between reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "GROW_RECONNECT_MAX_DELAY_MS", help = "Maximum backoff delay in milliseconds between reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "GROW_RECONNECT_MAX_ATTEMPTS", help = "Consecutive failed reconnects tolerated before giving up.")]
    pub reconnect_max_attempts: Option<u32>,

    #[clap(long, env = "GROW_KEEPALIVE_INTERVAL_SECONDS", help = "Interval in seconds between keep-alive pings.")]
    pub keepalive_interval_seconds: Option<u64>,

    #[clap(long, env = "GROW_ATTENDANCE_LIMIT", help = "Maximum attendance records fetched in the initial snapshot.")]
    pub attendance_limit: Option<u32>,

    #[clap(long, env = "GROW_ATTENDANCE_PAGE_SIZE", help = "Records per page in the attendance view.")]
    pub attendance_page_size: Option<usize>,
}

impl GrowConfig {
    // Merge two configs, where 'other' overrides 'self' for Some values
    fn merge(self, other: GrowConfig) -> GrowConfig {
        GrowConfig {
            ws_url: other.ws_url.or(self.ws_url),
            api_url: other.api_url.or(self.api_url),
            api_token: other.api_token.or(self.api_token),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            reconnect_max_attempts: other.reconnect_max_attempts.or(self.reconnect_max_attempts),
            keepalive_interval_seconds: other
                .keepalive_interval_seconds
                .or(self.keepalive_interval_seconds),
            attendance_limit: other.attendance_limit.or(self.attendance_limit),
            attendance_page_size: other.attendance_page_size.or(self.attendance_page_size),
        }
    }

    pub fn ws_url(&self) -> String {
        self.ws_url.clone().unwrap_or_else(|| DEFAULT_WS_URL.to_string())
    }

    pub fn api_url(&self) -> String {
        self.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn api_token(&self) -> Option<String> {
        self.api_token.clone()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    pub fn attendance_limit(&self) -> u32 {
        self.attendance_limit.unwrap_or(1000)
    }

    pub fn attendance_page_size(&self) -> usize {
        self.attendance_page_size.unwrap_or(20)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            ws_url: self.ws_url(),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_seconds.unwrap_or(30)),
            reconnect_base_delay: Duration::from_millis(
                self.reconnect_base_delay_ms.unwrap_or(5000),
            ),
            reconnect_max_delay: Duration::from_millis(
                self.reconnect_max_delay_ms.unwrap_or(60_000),
            ),
            reconnect_max_attempts: self.reconnect_max_attempts.unwrap_or(10),
        }
    }
}

pub fn load_config() -> GrowConfig {
    // 1. Load defaults
    let default_config = GrowConfig {
        ws_url: Some(DEFAULT_WS_URL.to_string()),
        api_url: Some(DEFAULT_API_URL.to_string()),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        reconnect_base_delay_ms: Some(5000),
        reconnect_max_delay_ms: Some(60_000),
        reconnect_max_attempts: Some(10),
        keepalive_interval_seconds: Some(30),
        attendance_limit: Some(1000),
        attendance_page_size: Some(20),
        ..Default::default()
    };

    // 2. Load from config file (grow_sync.conf) if present.
    //    Allow overriding the default config file path with a CLI arg.
    let cli_args_for_path = GrowConfig::parse();

    let config_file_path = cli_args_for_path
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("grow_sync.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<GrowConfig>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!(
                    "Failed to parse config file: {}. Falling back to other sources.",
                    config_file_path.display()
                );
            }
        } else {
            log::warn!(
                "Failed to read config file: {}. Falling back to other sources.",
                config_file_path.display()
            );
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // 3. Override with environment variables and CLI arguments.
    //    clap handles env vars and CLI args; merge them over the file config.
    let cli_args_final = GrowConfig::parse();
    current_config.merge(cli_args_final)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_the_overriding_config() {
        let base = GrowConfig {
            ws_url: Some("wss://base".into()),
            api_url: Some("https://base".into()),
            reconnect_max_attempts: Some(10),
            ..Default::default()
        };
        let overlay = GrowConfig {
            ws_url: Some("wss://overlay".into()),
            attendance_limit: Some(50),
            ..Default::default()
        };

        let merged = base.merge(overlay);
        assert_eq!(merged.ws_url.as_deref(), Some("wss://overlay"));
        assert_eq!(merged.api_url.as_deref(), Some("https://base"));
        assert_eq!(merged.reconnect_max_attempts, Some(10));
        assert_eq!(merged.attendance_limit, Some(50));
    }

    #[test]
    fn accessors_fall_back_to_production_defaults() {
        let config = GrowConfig::default();
        assert_eq!(config.ws_url(), DEFAULT_WS_URL);
        assert_eq!(config.api_url(), DEFAULT_API_URL);
        assert_eq!(config.attendance_limit(), 1000);
        assert_eq!(config.attendance_page_size(), 20);

        let settings = config.connection_settings();
        assert_eq!(settings.reconnect_base_delay, Duration::from_secs(5));
        assert_eq!(settings.reconnect_max_delay, Duration::from_secs(60));
        assert_eq!(settings.reconnect_max_attempts, 10);
        assert_eq!(settings.keepalive_interval, Duration::from_secs(30));
    }
}
