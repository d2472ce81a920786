//! Read path
//!
//! One connect-or-reuse attempt and one read per request. Any failure turns
//! into an `error` response and discards the pooled connection the request
//! was holding.

use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::device::{DeviceIdentity, ReadRequest};
use crate::error::{GatewayError, Result};
use crate::pool::ConnectionPool;

/// Connection state reported with every read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

/// Outcome of one holding-register read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    pub values: Vec<u16>,
    /// RFC 3339 time of a successful read
    pub timestamp: Option<String>,
    pub error: Option<String>,
    pub connection_status: ConnectionStatus,
}

impl ReadResponse {
    /// State before any read has happened
    pub fn disconnected() -> Self {
        Self {
            values: Vec::new(),
            timestamp: None,
            error: None,
            connection_status: ConnectionStatus::Disconnected,
        }
    }

    pub fn connected(values: Vec<u16>) -> Self {
        Self {
            values,
            timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            error: None,
            connection_status: ConnectionStatus::Connected,
        }
    }

    pub fn failed(err: &GatewayError) -> Self {
        Self {
            values: Vec::new(),
            timestamp: None,
            error: Some(format!("Error: {}", err.message())),
            connection_status: ConnectionStatus::Error,
        }
    }
}

impl Default for ReadResponse {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Gateway operations on top of the connection pool
pub struct GatewayService {
    pool: Arc<ConnectionPool>,
    last_status: RwLock<ReadResponse>,
}

impl GatewayService {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            last_status: RwLock::new(ReadResponse::disconnected()),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Read holding registers from the requested device
    ///
    /// Never fails: device errors are reported in the response body.
    pub async fn read(&self, request: &ReadRequest) -> ReadResponse {
        let started = Instant::now();
        let device = &request.device;
        debug!(
            "Reading registers from {}: start {}, count {}",
            device, request.starting_register, request.number_of_registers
        );

        let response = match self.read_once(request).await {
            Ok(values) => {
                info!(
                    "Read {} register(s) from {} in {} ms: {:?}",
                    values.len(),
                    device,
                    started.elapsed().as_millis(),
                    values
                );
                ReadResponse::connected(values)
            },
            Err(e) => {
                error!(
                    "Read from {} failed after {} ms: {}",
                    device,
                    started.elapsed().as_millis(),
                    e
                );
                ReadResponse::failed(&e)
            },
        };

        *self.last_status.write().await = response.clone();
        response
    }

    async fn read_once(&self, request: &ReadRequest) -> Result<Vec<u16>> {
        let mut guard = self.pool.checkout(&request.device).await;

        let outcome = match guard.ensure_connected().await {
            Ok(()) => {
                guard
                    .read_holding_registers(request.starting_register, request.number_of_registers)
                    .await
            },
            Err(e) => Err(e),
        };

        if outcome.is_err() {
            guard.discard().await;
        }
        outcome
    }

    /// Close and forget the connection for `device`
    pub async fn disconnect(&self, device: &DeviceIdentity) -> bool {
        let removed = self.pool.evict(device).await;
        info!(
            "Disconnect {}: {}",
            device,
            if removed { "closed" } else { "not pooled" }
        );
        removed
    }

    /// Outcome of the most recent read
    pub async fn last_status(&self) -> ReadResponse {
        self.last_status.read().await.clone()
    }
}
