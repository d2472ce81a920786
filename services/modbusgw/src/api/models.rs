//! API request and response models
//!
//! Request fields are optional at the serde level so that a missing field is
//! reported as a validation failure naming the full required set, rather
//! than as a generic deserialization error.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

use crate::config::{GatewaySettings, ModbusServerConfig, PollingConfig};
use crate::device::{DeviceIdentity, ReadRequest};
use crate::error::{GatewayError, Result};
use crate::pool::ConnectionInfo;
use crate::service::{ConnectionStatus, ReadResponse};

const READ_FIELDS: &str = "ip, port, slaveId, startingRegister, numberOfRegisters";
const DEVICE_FIELDS: &str = "ip, port, slaveId";

/// `POST /data` body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub slave_id: Option<u8>,
    pub starting_register: Option<u16>,
    pub number_of_registers: Option<u16>,
}

impl DataRequest {
    pub fn into_read_request(self) -> Result<ReadRequest> {
        let (Some(ip), Some(port), Some(slave_id), Some(start), Some(count)) = (
            non_blank(self.ip),
            self.port,
            self.slave_id,
            self.starting_register,
            self.number_of_registers,
        ) else {
            return Err(missing(READ_FIELDS));
        };

        ReadRequest::new(DeviceIdentity::new(ip, port, slave_id), start, count)
    }
}

/// 400 body for a rejected `POST /data`
///
/// Shaped like a failed read so clients can keep keying off
/// `connectionStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequestError {
    pub error: String,
    pub message: String,
    pub connection_status: ConnectionStatus,
}

impl DataRequestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: "Invalid request".to_string(),
            message: message.into(),
            connection_status: ConnectionStatus::Error,
        }
    }
}

impl From<GatewayError> for DataRequestError {
    fn from(err: GatewayError) -> Self {
        Self::new(err.message())
    }
}

impl IntoResponse for DataRequestError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

/// `POST /disconnect` body
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub slave_id: Option<u8>,
}

impl DisconnectRequest {
    pub fn into_identity(self) -> Result<DeviceIdentity> {
        match (non_blank(self.ip), self.port, self.slave_id) {
            (Some(ip), Some(port), Some(slave_id)) => Ok(DeviceIdentity::new(ip, port, slave_id)),
            _ => Err(missing(DEVICE_FIELDS)),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn missing(fields: &str) -> GatewayError {
    GatewayError::validation(format!("Missing configuration parameters ({})", fields))
}

/// Device triple as echoed by `/disconnect` and `/config`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlcInfo {
    pub ip: String,
    pub port: u16,
    pub slave_id: u8,
}

impl From<DeviceIdentity> for PlcInfo {
    fn from(device: DeviceIdentity) -> Self {
        Self {
            ip: device.ip,
            port: device.port,
            slave_id: device.slave_id,
        }
    }
}

impl From<ModbusServerConfig> for PlcInfo {
    fn from(server: ModbusServerConfig) -> Self {
        Self {
            ip: server.ip,
            port: server.port,
            slave_id: server.slave_id,
        }
    }
}

impl From<PlcInfo> for ModbusServerConfig {
    fn from(plc: PlcInfo) -> Self {
        Self {
            ip: plc.ip.trim().to_string(),
            port: plc.port,
            slave_id: plc.slave_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub message: String,
    pub plc: PlcInfo,
}

/// Polling settings in wire form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingSettings {
    pub interval: u64,
    pub starting_register: u16,
    pub number_of_registers: u16,
}

impl From<PollingConfig> for PollingSettings {
    fn from(polling: PollingConfig) -> Self {
        Self {
            interval: polling.interval,
            starting_register: polling.starting_register,
            number_of_registers: polling.number_of_registers,
        }
    }
}

impl From<PollingSettings> for PollingConfig {
    fn from(polling: PollingSettings) -> Self {
        Self {
            interval: polling.interval,
            starting_register: polling.starting_register,
            number_of_registers: polling.number_of_registers,
        }
    }
}

/// `GET /config` response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub modbus_server: PlcInfo,
    pub polling: PollingSettings,
    pub status: ReadResponse,
}

/// `POST /config` body; an omitted section keeps its current value
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigRequest {
    pub modbus_server: Option<PlcInfo>,
    pub polling: Option<PollingSettings>,
}

impl UpdateConfigRequest {
    /// Apply onto `current`, validating the result
    pub fn apply(self, current: &GatewaySettings) -> Result<GatewaySettings> {
        let modbus_server = match self.modbus_server {
            Some(plc) => {
                let server = ModbusServerConfig::from(plc);
                if server.ip.is_empty() {
                    return Err(GatewayError::validation(
                        "modbusServer.ip must be a non-empty string",
                    ));
                }
                server
            },
            None => current.modbus_server.clone(),
        };
        let polling = match self.polling {
            Some(polling) => PollingConfig::from(polling),
            None => current.polling.clone(),
        };
        polling.validate()?;

        Ok(GatewaySettings {
            modbus_server,
            polling,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsBody {
    pub modbus_server: PlcInfo,
    pub polling: PollingSettings,
}

impl From<GatewaySettings> for SettingsBody {
    fn from(settings: GatewaySettings) -> Self {
        Self {
            modbus_server: settings.modbus_server.into(),
            polling: settings.polling.into(),
        }
    }
}

/// `POST /config` response
#[derive(Debug, Serialize)]
pub struct UpdateConfigResponse {
    pub message: String,
    pub config: SettingsBody,
}

/// One `GET /connections` entry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEntry {
    pub ip: String,
    pub port: u16,
    pub slave_id: u8,
    pub is_connected: bool,
}

impl From<ConnectionInfo> for ConnectionEntry {
    fn from(info: ConnectionInfo) -> Self {
        Self {
            ip: info.identity.ip,
            port: info.identity.port,
            slave_id: info.identity.slave_id,
            is_connected: info.is_open,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionEntry>,
}
