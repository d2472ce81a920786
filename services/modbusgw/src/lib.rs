//! Modbus Gateway Library
//!
//! REST front end for Modbus/TCP devices. Each request names its target
//! device; connections are pooled per (ip, port, slave id) and reused until
//! a read fails or the device is explicitly disconnected.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod device;
pub mod error;
pub mod pool;
pub mod service;
pub mod transport;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

pub use config::{AppConfig, GatewaySettings};
pub use device::{DeviceIdentity, ReadRequest};
pub use error::{GatewayError, Result};
pub use pool::{ConnectionGuard, ConnectionInfo, ConnectionPool};
pub use service::{ConnectionStatus, GatewayService, ReadResponse};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gateway: Arc<GatewayService>,
    pub settings: Arc<RwLock<GatewaySettings>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, pool: Arc<ConnectionPool>) -> Self {
        let settings = config.settings();
        Self {
            config: Arc::new(config),
            gateway: Arc::new(GatewayService::new(pool)),
            settings: Arc::new(RwLock::new(settings)),
            started_at: Instant::now(),
        }
    }
}
