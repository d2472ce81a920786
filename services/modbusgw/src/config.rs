//! Gateway configuration
//!
//! Layering, lowest to highest priority:
//! 1. Built-in defaults
//! 2. YAML file (`config/modbusgw.yaml` unless `--config` says otherwise)
//! 3. `MODBUSGW_` environment variables, `__` separating nested keys
//!    (e.g. `MODBUSGW_TRANSPORT__READ_TIMEOUT_MS=500`)
//! 4. `API_PORT`, mapped onto `api.port`

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::MAX_READ_REGISTERS;
use crate::error::{GatewayError, Result};
use crate::transport::TransportTimeouts;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_CONFIG_PATH: &str = "config/modbusgw.yaml";
pub const ENV_PREFIX: &str = "MODBUSGW_";

/// Complete gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
    /// Initial device settings reported by `GET /config`
    pub modbus_server: ModbusServerConfig,
    /// Initial polling settings reported by `GET /config`
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "modbusgw".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            read_timeout_ms: 3000,
        }
    }
}

impl TransportConfig {
    pub fn timeouts(&self) -> TransportTimeouts {
        TransportTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for daily-rotated log files; console only when unset
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

/// Target device settings stored by `/config`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusServerConfig {
    pub ip: String,
    pub port: u16,
    pub slave_id: u8,
}

impl Default for ModbusServerConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 502,
            slave_id: 1,
        }
    }
}

/// Polling settings stored by `/config`; no loop consumes them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval in milliseconds
    pub interval: u64,
    pub starting_register: u16,
    pub number_of_registers: u16,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: 1000,
            starting_register: 0,
            number_of_registers: 1,
        }
    }
}

impl PollingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(GatewayError::validation(
                "polling.interval must be greater than 0",
            ));
        }
        if self.number_of_registers > MAX_READ_REGISTERS {
            return Err(GatewayError::validation(format!(
                "polling.numberOfRegisters must not exceed {}",
                MAX_READ_REGISTERS
            )));
        }
        Ok(())
    }
}

/// Runtime-mutable settings exposed by `/config`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GatewaySettings {
    pub modbus_server: ModbusServerConfig,
    pub polling: PollingConfig,
}

impl AppConfig {
    /// Initial `/config` settings
    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            modbus_server: self.modbus_server.clone(),
            polling: self.polling.clone(),
        }
    }

    /// Build the layered figment for `path`
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&["API_PORT"])
                    .map(|_| "api.port".into()),
            )
    }

    /// Load and validate configuration
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let config: AppConfig = Self::figment(path)
            .extract()
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.host.trim().is_empty() {
            return Err(GatewayError::config("api.host must not be empty"));
        }
        if self.transport.connect_timeout_ms == 0 {
            return Err(GatewayError::config(
                "transport.connect_timeout_ms must be greater than 0",
            ));
        }
        if self.transport.read_timeout_ms == 0 {
            return Err(GatewayError::config(
                "transport.read_timeout_ms must be greater than 0",
            ));
        }
        self.polling
            .validate()
            .map_err(|e| GatewayError::config(e.message()))?;
        Ok(())
    }
}
