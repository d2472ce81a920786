//! Common test utilities and helpers

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use modbusgw::{
    api::routes,
    transport::{SimulatedDevices, SimulatorFactory},
    AppConfig, AppState, ConnectionPool,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

/// Router wired to simulated devices, plus handles for inspection
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub devices: Arc<SimulatedDevices>,
}

impl TestApp {
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        self.state.gateway.pool()
    }
}

/// Create a test app backed by an empty simulated device registry
pub fn create_test_app() -> TestApp {
    let devices = SimulatedDevices::new();
    let factory = Arc::new(SimulatorFactory::new(Arc::clone(&devices)));
    let pool = Arc::new(ConnectionPool::new(factory));
    let state = AppState::new(AppConfig::default(), pool);

    TestApp {
        router: routes::create_router(state.clone()),
        state,
        devices,
    }
}

/// Helper to make JSON requests
pub async fn json_request(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = if let Some(json) = body {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap()
    } else {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    send(app, request).await
}

/// Send a raw request and decode the JSON body
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let body: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, body)
}

pub fn read_body(ip: &str, port: u16, slave_id: u8, start: u16, count: u16) -> Value {
    json!({
        "ip": ip,
        "port": port,
        "slaveId": slave_id,
        "startingRegister": start,
        "numberOfRegisters": count,
    })
}
