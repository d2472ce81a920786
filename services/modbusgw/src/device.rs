//! Device identity and typed read requests

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Modbus limit for a single holding-register read (function code 0x03)
pub const MAX_READ_REGISTERS: u16 = 125;

/// The (ip, port, slave id) triple addressing one logical Modbus device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub ip: String,
    pub port: u16,
    pub slave_id: u8,
}

impl DeviceIdentity {
    /// Build an identity, trimming whitespace around the ip
    pub fn new(ip: impl AsRef<str>, port: u16, slave_id: u8) -> Self {
        Self {
            ip: ip.as_ref().trim().to_string(),
            port,
            slave_id,
        }
    }

    /// `ip:port` without the slave id
    pub fn socket_label(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.ip, self.port, self.slave_id)
    }
}

/// Validated holding-register read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub device: DeviceIdentity,
    pub starting_register: u16,
    pub number_of_registers: u16,
}

impl ReadRequest {
    pub fn new(
        device: DeviceIdentity,
        starting_register: u16,
        number_of_registers: u16,
    ) -> Result<Self> {
        if device.ip.is_empty() {
            return Err(GatewayError::validation("ip must be a non-empty string"));
        }
        if number_of_registers > MAX_READ_REGISTERS {
            return Err(GatewayError::validation(format!(
                "numberOfRegisters must not exceed {}",
                MAX_READ_REGISTERS
            )));
        }
        if u32::from(starting_register) + u32::from(number_of_registers) > 65536 {
            return Err(GatewayError::validation(
                "startingRegister + numberOfRegisters exceeds the register address space",
            ));
        }

        Ok(Self {
            device,
            starting_register,
            number_of_registers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_trims_ip_and_formats() {
        let id = DeviceIdentity::new("  10.0.0.5 ", 502, 1);
        assert_eq!(id.ip, "10.0.0.5");
        assert_eq!(id.to_string(), "10.0.0.5:502:1");
        assert_eq!(id.socket_label(), "10.0.0.5:502");
    }

    #[test]
    fn test_identities_differing_in_slave_are_distinct() {
        let mut set = HashSet::new();
        set.insert(DeviceIdentity::new("10.0.0.5", 502, 1));
        set.insert(DeviceIdentity::new("10.0.0.5", 502, 2));
        set.insert(DeviceIdentity::new(" 10.0.0.5", 502, 1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_read_request_accepts_zero_values() {
        let req = ReadRequest::new(DeviceIdentity::new("10.0.0.5", 502, 0), 0, 0);
        assert!(req.is_ok());
    }

    #[test]
    fn test_read_request_bounds() {
        let id = DeviceIdentity::new("10.0.0.5", 502, 1);
        assert!(ReadRequest::new(id.clone(), 0, 125).is_ok());
        assert!(ReadRequest::new(id.clone(), 0, 126).is_err());
        assert!(ReadRequest::new(id.clone(), 65535, 1).is_ok());
        assert!(ReadRequest::new(id, 65535, 2).is_err());
    }

    #[test]
    fn test_read_request_rejects_blank_ip() {
        let err = ReadRequest::new(DeviceIdentity::new("   ", 502, 1), 0, 1).unwrap_err();
        assert!(matches!(err, GatewayError::ValidationError(_)));
    }
}
