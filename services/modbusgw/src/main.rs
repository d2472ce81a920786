//! Modbus Gateway (`modbusgw`)
//!
//! REST-to-Modbus/TCP gateway with per-device connection pooling.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::serve;
use clap::Parser;
use tracing::{error, info};

use common::service_bootstrap::{self, ServiceInfo};
use common::shutdown::wait_for_shutdown;
use modbusgw::{
    api::routes::{create_router, endpoint_summary},
    bootstrap::{self, Args},
    AppConfig, AppState, ConnectionPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let service_info = ServiceInfo::new(
        config.service.name.clone(),
        env!("CARGO_PKG_VERSION"),
        "REST-to-Modbus/TCP Gateway",
        config.api.port,
    );

    service_bootstrap::init_logging(
        &service_info,
        &args.effective_log_level(&config),
        config.logging.dir.clone(),
        !args.no_color,
    )?;
    if !args.no_color {
        service_bootstrap::print_startup_banner(&service_info);
    }

    // Validation mode: validate and exit
    if args.validate {
        info!("Configuration {} is valid", args.config.display());
        info!(
            "  API: {}:{}, transport timeouts: connect {} ms, read {} ms",
            config.api.host,
            config.api.port,
            config.transport.connect_timeout_ms,
            config.transport.read_timeout_ms
        );
        info!(
            "  Default device: {}:{} (slave {})",
            config.modbus_server.ip, config.modbus_server.port, config.modbus_server.slave_id
        );
        return Ok(());
    }

    let bind_address = bootstrap::determine_bind_address(args.bind_address.clone(), &config);
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind_address))?;

    let factory = bootstrap::create_transport_factory(args.simulate, &config);
    let pool = Arc::new(ConnectionPool::new(factory));
    info!(
        "Connection pool ready (transport: {})",
        pool.transport_name()
    );

    let state = AppState::new(config, Arc::clone(&pool));
    let app = create_router(state);

    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()
    } else {
        tokio::net::TcpSocket::new_v6()
    };
    let socket = socket.context("Failed to create socket")?;
    socket
        .set_reuseaddr(true)
        .context("Failed to set SO_REUSEADDR")?;
    socket
        .bind(addr)
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let listener = socket.listen(1024).context("Failed to listen")?;

    info!("API server listening on http://{}", addr);
    for (method, path) in endpoint_summary() {
        info!("  {:<5} http://{}{}", method, addr, path);
    }

    if let Err(e) = serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
    {
        error!("Server error: {}", e);
    }

    info!("Shutting down, closing pooled connections");
    pool.close_all().await;
    info!("Shutdown complete");

    Ok(())
}
