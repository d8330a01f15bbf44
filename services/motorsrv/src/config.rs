//! Service configuration
//!
//! Layers, last wins: built-in defaults, an optional file (format chosen by
//! extension), then `MOTORSRV_*` environment variables with `__` separating
//! nested keys (`MOTORSRV_MOTOR__HOST=10.0.0.5`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use rig_modbus::ConnectionParams;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MotorSrvError, Result};
use crate::poller::RegisterMap;
use crate::reconnect::ReconnectPolicy;
use crate::units::{ScalingConfig, UnitConverter};

pub const ENV_PREFIX: &str = "MOTORSRV_";
/// Config file path when `--config` is not given
pub const ENV_CONFIG_PATH: &str = "MOTORSRV_CONFIG";

pub const SERVICE_NAME: &str = "motorsrv";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorSrvConfig {
    pub api: ApiConfig,
    pub motor: MotorConfig,
    pub registers: RegisterMap,
    pub polling: PollingConfig,
    pub reconnect: ReconnectConfig,
    pub scaling: ScalingConfig,
    pub fanout: FanoutConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Motor controller endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Bound on connect and on every register operation
    pub timeout_ms: u64,
    /// Read the RPM register once while connecting
    pub handshake_probe: bool,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            timeout_ms: 2000,
            handshake_probe: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Pause after a failed cycle before faulting the link
    pub cooldown_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            cooldown_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
    pub max_attempts: Option<u32>,
    pub cooldown_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 3000,
            multiplier: 1.0,
            max_backoff_ms: 30_000,
            jitter_ms: 0,
            max_attempts: None,
            cooldown_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Events buffered per subscriber before it starts losing the oldest
    pub capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            capacity: crate::fanout::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: PathBuf,
    pub file: bool,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            dir: PathBuf::from("logs"),
            file: false,
            json: false,
        }
    }
}

impl MotorSrvConfig {
    /// Load and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(path, ENV_PREFIX)?.extract()?;
        config.validate()?;
        if let Some(path) = path {
            info!("Config loaded from {}", path.display());
        }
        Ok(config)
    }

    pub fn figment(path: Option<&Path>, env_prefix: &str) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(MotorSrvError::config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            figment = match ext {
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "json" => figment.merge(Json::file(path)),
                _ => {
                    return Err(MotorSrvError::config(format!(
                        "Unsupported config format: {}",
                        path.display()
                    )))
                },
            };
        }

        Ok(figment.merge(Env::prefixed(env_prefix).split("__").ignore(&["config"])))
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.api.port == 0 {
            errors.push("api.port must not be 0".to_string());
        }
        if self.motor.host.trim().is_empty() {
            errors.push("motor.host is empty".to_string());
        }
        if self.motor.port == 0 {
            errors.push("motor.port must not be 0".to_string());
        }
        if self.motor.timeout_ms == 0 {
            errors.push("motor.timeout_ms must be positive".to_string());
        }
        if self.polling.interval_ms == 0 {
            errors.push("polling.interval_ms must be positive".to_string());
        }
        if self.reconnect.backoff_ms == 0 {
            errors.push("reconnect.backoff_ms must be positive".to_string());
        }
        if self.reconnect.multiplier.is_nan() || self.reconnect.multiplier < 1.0 {
            errors.push("reconnect.multiplier must be >= 1.0".to_string());
        }
        if self.fanout.capacity == 0 {
            errors.push("fanout.capacity must be positive".to_string());
        }
        if self
            .logging
            .level
            .parse::<tracing::level_filters::LevelFilter>()
            .is_err()
        {
            errors.push(format!("logging.level '{}' is not a level", self.logging.level));
        }
        errors.extend(self.scaling.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MotorSrvError::config(errors.join("; ")))
        }
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.motor.host.clone(),
            port: self.motor.port,
            unit_id: self.motor.unit_id,
            timeout: self.op_timeout(),
            probe_register: self.motor.handshake_probe.then_some(self.registers.rpm),
        }
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.motor.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn poll_cooldown(&self) -> Duration {
        Duration::from_millis(self.polling.cooldown_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.reconnect;
        ReconnectPolicy {
            initial_delay: Duration::from_millis(r.backoff_ms),
            backoff_multiplier: r.multiplier,
            max_delay: Duration::from_millis(r.max_backoff_ms),
            jitter: Duration::from_millis(r.jitter_ms),
            max_attempts: r.max_attempts,
            cooldown: Duration::from_millis(r.cooldown_ms),
        }
    }

    pub fn converter(&self) -> UnitConverter {
        UnitConverter::new(self.scaling)
    }

    pub fn log_config(&self) -> common::logging::LogConfig {
        common::logging::LogConfig {
            service_name: SERVICE_NAME.to_string(),
            level: self.logging.level.clone(),
            extra_targets: vec!["rig_modbus".to_string(), "tower_http".to_string()],
            log_dir: self.logging.dir.clone(),
            enable_file: self.logging.file,
            enable_json: self.logging.json,
        }
    }
}
