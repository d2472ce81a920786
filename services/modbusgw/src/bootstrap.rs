//! Service bootstrap
//!
//! Command-line arguments, transport selection and bind address resolution.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::transport::{SimulatedDevices, SimulatorFactory, TcpTransportFactory, TransportFactory};

/// Command-line arguments for modbusgw
#[derive(Parser, Debug, Clone)]
#[command(
    name = "modbusgw",
    version = env!("CARGO_PKG_VERSION"),
    about = "REST-to-Modbus/TCP Gateway",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Bind address for API server
    #[arg(short = 'b', long)]
    pub bind_address: Option<String>,

    /// Serve in-memory simulated devices instead of real Modbus TCP
    #[arg(long)]
    pub simulate: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// Effective log level: CLI first, then configuration
    pub fn effective_log_level(&self, config: &AppConfig) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone())
    }
}

/// Determine bind address
/// Priority: CLI > Config (which already folds in env and defaults)
pub fn determine_bind_address(cli_arg: Option<String>, config: &AppConfig) -> String {
    if let Some(addr) = cli_arg {
        info!("Using bind address from command line: {}", addr);
        return addr;
    }

    let addr = format!("{}:{}", config.api.host, config.api.port);
    info!("Using bind address from configuration: {}", addr);
    addr
}

/// Pick the transport backing the connection pool
pub fn create_transport_factory(simulate: bool, config: &AppConfig) -> Arc<dyn TransportFactory> {
    if simulate {
        info!("Simulation mode: serving in-memory demo devices");
        Arc::new(SimulatorFactory::new(SimulatedDevices::new()))
    } else {
        Arc::new(TcpTransportFactory::new(config.transport.timeouts()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_bind_address_wins() {
        let config = AppConfig::default();
        assert_eq!(
            determine_bind_address(Some("127.0.0.1:9000".to_string()), &config),
            "127.0.0.1:9000"
        );
        assert_eq!(determine_bind_address(None, &config), "0.0.0.0:3001");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["modbusgw", "--simulate", "-l", "debug"]);
        assert!(args.simulate);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.effective_log_level(&AppConfig::default()), "debug");

        let args = Args::parse_from(["modbusgw"]);
        assert_eq!(args.effective_log_level(&AppConfig::default()), "info");
    }

    #[test]
    fn test_factory_selection() {
        let config = AppConfig::default();
        assert_eq!(create_transport_factory(true, &config).name(), "simulator");
        assert_eq!(create_transport_factory(false, &config).name(), "modbus-tcp");
    }
}
