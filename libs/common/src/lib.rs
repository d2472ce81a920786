//! Shared service plumbing for the gateway workspace
//!
//! Provides the pieces every service binary needs around its core logic:
//! - API response envelopes and the axum `AppError`
//! - logging initialization
//! - startup banner and service metadata
//! - shutdown signal handling

pub mod api_types;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

// Re-export commonly used API types
pub use api_types::{
    ComponentHealth, ErrorInfo, ErrorResponse, HealthStatus, ServiceStatus, SuccessResponse,
};

// Re-export AppError when axum feature is enabled
#[cfg(feature = "axum")]
pub use api_types::AppError;

pub use logging::LogConfig;
pub use service_bootstrap::ServiceInfo;

// Re-export common dependencies
pub use anyhow;
