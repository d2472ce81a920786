//! Transport capability
//!
//! A transport is one stateful handle to a device: it can be connected,
//! queried for openness, read from and closed. The pool owns handles and
//! never looks inside them; open/closed state always comes from the handle.

pub mod simulator;
pub mod tcp;

use async_trait::async_trait;

use crate::device::DeviceIdentity;
use crate::error::Result;

pub use simulator::{SimulatedDevices, SimulatedTransport, SimulatorFactory};
pub use tcp::{TcpTransport, TcpTransportFactory, TransportTimeouts};

/// One connection to a Modbus device
#[async_trait]
pub trait ModbusTransport: Send {
    /// Open the connection and bind the slave id
    async fn connect(&mut self, device: &DeviceIdentity) -> Result<()>;

    /// Whether the handle currently holds an open connection
    fn is_open(&self) -> bool;

    /// Read `count` holding registers starting at `start`
    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>>;

    /// Close the connection; a closed handle may be connected again
    async fn close(&mut self) -> Result<()>;
}

/// Creates fresh, unconnected transport handles
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn ModbusTransport>;

    /// Short name for logs and health output
    fn name(&self) -> &'static str;
}
