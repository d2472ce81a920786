//! API handlers for the Modbus gateway

use std::collections::HashMap;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use common::{AppError, ComponentHealth, HealthStatus, ServiceStatus, SuccessResponse};
use tracing::{debug, info, warn};

use crate::api::models::*;
use crate::service::ReadResponse;
use crate::AppState;

fn parse_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            Err(AppError::bad_request(rejection.body_text()))
        },
    }
}

/// Read holding registers from the device named in the body
///
/// Device failures are reported with status 200 and `connectionStatus: "error"`;
/// invalid bodies get a 400 [`DataRequestError`].
pub async fn read_data(
    State(state): State<AppState>,
    body: std::result::Result<Json<DataRequest>, JsonRejection>,
) -> Result<Json<ReadResponse>, DataRequestError> {
    let request = parse_body(body)
        .map_err(|e| DataRequestError::new(e.error.message))?
        .into_read_request()
        .map_err(|e| {
            warn!("Invalid data request: {}", e);
            DataRequestError::from(e)
        })?;

    Ok(Json(state.gateway.read(&request).await))
}

/// Current settings plus the outcome of the latest read
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let settings = state.settings.read().await.clone();
    let status = state.gateway.last_status().await;

    Json(ConfigResponse {
        modbus_server: settings.modbus_server.into(),
        polling: settings.polling.into(),
        status,
    })
}

/// Replace device and/or polling settings
pub async fn update_config(
    State(state): State<AppState>,
    body: std::result::Result<Json<UpdateConfigRequest>, JsonRejection>,
) -> Result<Json<UpdateConfigResponse>, AppError> {
    let update = parse_body(body)?;

    let mut settings = state.settings.write().await;
    let next = update.apply(&settings)?;
    *settings = next.clone();
    drop(settings);

    info!(
        "Configuration updated: device {}:{}:{}, polling every {} ms",
        next.modbus_server.ip,
        next.modbus_server.port,
        next.modbus_server.slave_id,
        next.polling.interval
    );

    Ok(Json(UpdateConfigResponse {
        message: "Configuration updated successfully".to_string(),
        config: next.into(),
    }))
}

/// Close and forget the pooled connection for one device
pub async fn disconnect(
    State(state): State<AppState>,
    body: std::result::Result<Json<DisconnectRequest>, JsonRejection>,
) -> Result<Json<DisconnectResponse>, AppError> {
    let device = parse_body(body)?.into_identity()?;

    state.gateway.disconnect(&device).await;

    Ok(Json(DisconnectResponse {
        message: format!("Disconnected from PLC {}", device.socket_label()),
        plc: device.into(),
    }))
}

/// List pooled connections in insertion order
pub async fn list_connections(State(state): State<AppState>) -> Json<ConnectionsResponse> {
    let connections: Vec<ConnectionEntry> = state
        .gateway
        .pool()
        .list()
        .into_iter()
        .map(ConnectionEntry::from)
        .collect();
    debug!("Listing {} pooled connection(s)", connections.len());

    Json(ConnectionsResponse { connections })
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<SuccessResponse<HealthStatus>> {
    let pool = state.gateway.pool();
    let mut checks = HashMap::new();
    checks.insert(
        "connection_pool".to_string(),
        ComponentHealth::healthy(format!(
            "{} pooled connection(s) via {}",
            pool.len(),
            pool.transport_name()
        )),
    );

    Json(SuccessResponse::new(HealthStatus {
        status: ServiceStatus::Healthy,
        service: state.config.service.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now(),
        checks,
    }))
}
