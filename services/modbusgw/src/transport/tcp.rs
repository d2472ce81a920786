//! Modbus TCP transport backed by tokio-modbus

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

use super::{ModbusTransport, TransportFactory};
use crate::device::DeviceIdentity;
use crate::error::{ErrorExt, GatewayError, Result};

/// Connect and read timeouts applied to every TCP transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(3000),
            read: Duration::from_millis(3000),
        }
    }
}

/// Modbus TCP client connection
pub struct TcpTransport {
    timeouts: TransportTimeouts,
    ctx: Option<Context>,
    peer: Option<String>,
}

impl TcpTransport {
    pub fn new(timeouts: TransportTimeouts) -> Self {
        Self {
            timeouts,
            ctx: None,
            peer: None,
        }
    }

    /// Resolve and connect without borrowing `self`, whose context is not `Sync`
    async fn open(timeouts: TransportTimeouts, device: &DeviceIdentity) -> Result<Context> {
        let addrs = tokio::net::lookup_host((device.ip.as_str(), device.port))
            .await
            .connection_error(&format!("Invalid address {}", device.socket_label()))?;

        let mut last_err = None;
        for addr in addrs {
            match timeout(timeouts.connect, tcp::connect(addr)).await {
                Ok(Ok(mut ctx)) => {
                    ctx.set_slave(Slave(device.slave_id));
                    return Ok(ctx);
                },
                Ok(Err(e)) => {
                    last_err = Some(GatewayError::connection(format!(
                        "Failed to connect to {}: {}",
                        addr, e
                    )));
                },
                Err(_) => {
                    last_err = Some(GatewayError::connection(format!(
                        "Connection to {} timed out after {} ms",
                        addr,
                        timeouts.connect.as_millis()
                    )));
                },
            }
        }

        Err(last_err.unwrap_or_else(|| {
            GatewayError::connection(format!(
                "No address resolved for {}",
                device.socket_label()
            ))
        }))
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn connect(&mut self, device: &DeviceIdentity) -> Result<()> {
        if self.ctx.is_some() {
            // Stale context from an earlier binding
            if let Err(e) = self.close().await {
                warn!("Close before reconnect failed: {}", e);
            }
        }

        debug!("Connecting to Modbus TCP device {}", device);
        let ctx = Self::open(self.timeouts, device).await?;
        self.ctx = Some(ctx);
        self.peer = Some(device.to_string());
        debug!("Connected to Modbus TCP device {}", device);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let ctx = self.ctx.as_mut().ok_or_else(GatewayError::not_connected)?;

        let values = match timeout(self.timeouts.read, ctx.read_holding_registers(start, count))
            .await
        {
            Err(_) => {
                return Err(GatewayError::read(format!(
                    "Read timed out after {} ms",
                    self.timeouts.read.as_millis()
                )))
            },
            Ok(Err(e)) => return Err(GatewayError::read(format!("Transport failure: {}", e))),
            Ok(Ok(Err(code))) => {
                return Err(GatewayError::read(format!("Modbus exception: {:?}", code)))
            },
            Ok(Ok(Ok(values))) => values,
        };

        if values.len() != count as usize {
            return Err(GatewayError::read(format!(
                "Short response: expected {} registers, got {}",
                count,
                values.len()
            )));
        }

        Ok(values)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut ctx) = self.ctx.take() else {
            return Ok(());
        };
        let peer = self.peer.take().unwrap_or_default();
        debug!("Closing Modbus TCP connection to {}", peer);
        ctx.disconnect()
            .await
            .close_error(&format!("Failed to close connection to {}", peer))
    }
}

/// Factory producing [`TcpTransport`] handles with shared timeouts
#[derive(Debug, Clone, Default)]
pub struct TcpTransportFactory {
    timeouts: TransportTimeouts,
}

impl TcpTransportFactory {
    pub fn new(timeouts: TransportTimeouts) -> Self {
        Self { timeouts }
    }
}

impl TransportFactory for TcpTransportFactory {
    fn create(&self) -> Box<dyn ModbusTransport> {
        Box::new(TcpTransport::new(self.timeouts))
    }

    fn name(&self) -> &'static str {
        "modbus-tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn short_timeouts() -> TransportTimeouts {
        TransportTimeouts {
            connect: Duration::from_millis(500),
            read: Duration::from_millis(200),
        }
    }

    /// Answer one read-holding-registers request per frame with `values`
    async fn spawn_responder(values: Vec<u16>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            while socket.read_exact(&mut request).await.is_ok() {
                let byte_count = (values.len() * 2) as u8;
                let length = 3 + u16::from(byte_count);
                let mut frame = vec![request[0], request[1], 0, 0];
                frame.extend_from_slice(&length.to_be_bytes());
                frame.push(request[6]);
                frame.push(0x03);
                frame.push(byte_count);
                for v in &values {
                    frame.extend_from_slice(&v.to_be_bytes());
                }
                if socket.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });
        port
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new(short_timeouts());
        let err = transport
            .connect(&DeviceIdentity::new("127.0.0.1", port, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::ConnectionError(_)));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_read_without_connect_fails() {
        let mut transport = TcpTransport::new(short_timeouts());
        let err = transport.read_holding_registers(0, 1).await.unwrap_err();
        assert_eq!(err, GatewayError::not_connected());
    }

    #[tokio::test]
    async fn test_read_against_responder() {
        let port = spawn_responder(vec![10, 20, 30, 40]).await;
        let mut transport = TcpTransport::new(short_timeouts());
        transport
            .connect(&DeviceIdentity::new("127.0.0.1", port, 1))
            .await
            .unwrap();
        assert!(transport.is_open());

        let values = transport.read_holding_registers(0, 4).await.unwrap();
        assert_eq!(values, vec![10, 20, 30, 40]);

        transport.close().await.ok();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_factory_transport_connects_from_spawned_task() {
        let port = spawn_responder(vec![7]).await;
        let factory = TcpTransportFactory::new(short_timeouts());
        let mut transport = factory.create();

        let values = tokio::spawn(async move {
            transport
                .connect(&DeviceIdentity::new("127.0.0.1", port, 1))
                .await?;
            transport.read_holding_registers(0, 1).await
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(values, vec![7]);
    }

    #[tokio::test]
    async fn test_silent_device_times_out_on_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::new(short_timeouts());
        transport
            .connect(&DeviceIdentity::new("127.0.0.1", port, 1))
            .await
            .unwrap();

        let err = transport.read_holding_registers(0, 2).await.unwrap_err();
        match err {
            GatewayError::ReadError(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_is_noop_when_closed() {
        let mut transport = TcpTransport::new(short_timeouts());
        assert!(transport.close().await.is_ok());
    }
}
