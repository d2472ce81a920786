//! In-memory Modbus devices
//!
//! Backs the `--simulate` run mode and the test suites. Every connect and
//! close is counted per device so connection reuse is observable.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tracing::debug;

use super::{ModbusTransport, TransportFactory};
use crate::device::DeviceIdentity;
use crate::error::{GatewayError, Result};

/// Register value served when a device has no explicit register table
pub fn demo_register_value(address: u16) -> u16 {
    address.wrapping_add(1).wrapping_mul(10)
}

/// Shared registry of simulated devices
#[derive(Debug, Default)]
pub struct SimulatedDevices {
    registers: DashMap<DeviceIdentity, Vec<u16>>,
    unreachable: DashSet<String>,
    failing_reads: DashSet<DeviceIdentity>,
    connects: DashMap<DeviceIdentity, usize>,
    closes: DashMap<DeviceIdentity, usize>,
    total_connects: AtomicUsize,
    connect_delay_ms: AtomicU64,
    read_delay_ms: AtomicU64,
}

impl SimulatedDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `values` from register 0 upwards for `device`
    pub fn set_registers(&self, device: &DeviceIdentity, values: Vec<u16>) {
        self.registers.insert(device.clone(), values);
    }

    /// Refuse connections to every port and slave on `ip`
    pub fn set_unreachable(&self, ip: &str) {
        self.unreachable.insert(ip.trim().to_string());
    }

    pub fn set_reachable(&self, ip: &str) {
        self.unreachable.remove(ip.trim());
    }

    /// Make every read against `device` fail until cleared
    pub fn fail_reads(&self, device: &DeviceIdentity, failing: bool) {
        if failing {
            self.failing_reads.insert(device.clone());
        } else {
            self.failing_reads.remove(device);
        }
    }

    /// Delay applied to each connect, used to overlap concurrent callers
    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Delay applied to each read, used to hold a read in flight
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn connect_count(&self, device: &DeviceIdentity) -> usize {
        self.connects.get(device).map(|c| *c).unwrap_or(0)
    }

    pub fn close_count(&self, device: &DeviceIdentity) -> usize {
        self.closes.get(device).map(|c| *c).unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.total_connects.load(Ordering::Relaxed)
    }

    fn read(&self, device: &DeviceIdentity, start: u16, count: u16) -> Result<Vec<u16>> {
        if self.failing_reads.contains(device) {
            return Err(GatewayError::read(format!(
                "Device {} did not respond",
                device
            )));
        }

        let start = start as usize;
        let end = start + count as usize;
        match self.registers.get(device) {
            Some(table) => table
                .value()
                .get(start..end)
                .map(<[u16]>::to_vec)
                .ok_or_else(|| GatewayError::read("Modbus exception: IllegalDataAddress")),
            None => Ok((start..end).map(|a| demo_register_value(a as u16)).collect()),
        }
    }
}

/// Transport handle talking to a [`SimulatedDevices`] registry
pub struct SimulatedTransport {
    devices: Arc<SimulatedDevices>,
    bound: Option<DeviceIdentity>,
}

impl SimulatedTransport {
    pub fn new(devices: Arc<SimulatedDevices>) -> Self {
        Self {
            devices,
            bound: None,
        }
    }
}

#[async_trait]
impl ModbusTransport for SimulatedTransport {
    async fn connect(&mut self, device: &DeviceIdentity) -> Result<()> {
        let delay = self.devices.connect_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.devices.unreachable.contains(&device.ip) {
            return Err(GatewayError::connection(format!(
                "Failed to connect to {}: Connection refused",
                device.socket_label()
            )));
        }

        *self.devices.connects.entry(device.clone()).or_insert(0) += 1;
        self.devices.total_connects.fetch_add(1, Ordering::Relaxed);
        self.bound = Some(device.clone());
        debug!("Simulated device {} connected", device);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.bound.is_some()
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let device = self.bound.as_ref().ok_or_else(GatewayError::not_connected)?;
        let delay = self.devices.read_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.devices.read(device, start, count)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(device) = self.bound.take() {
            *self.devices.closes.entry(device).or_insert(0) += 1;
        }
        Ok(())
    }
}

/// Factory producing [`SimulatedTransport`] handles over one registry
#[derive(Debug, Clone)]
pub struct SimulatorFactory {
    devices: Arc<SimulatedDevices>,
}

impl SimulatorFactory {
    pub fn new(devices: Arc<SimulatedDevices>) -> Self {
        Self { devices }
    }
}

impl TransportFactory for SimulatorFactory {
    fn create(&self) -> Box<dyn ModbusTransport> {
        Box::new(SimulatedTransport::new(Arc::clone(&self.devices)))
    }

    fn name(&self) -> &'static str {
        "simulator"
    }
}
