//! Error handling for the Modbus gateway
//!
//! One error enum for the whole service. The data path converts connection
//! and read failures into an `error`-status response body; every other
//! endpoint maps errors to HTTP status codes through `common::AppError`.

use thiserror::Error;

/// Gateway error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Missing or malformed request fields (never touches the pool)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// TCP connect or slave bind failure, including connect timeouts
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Failure of a read over an established connection, including
    /// Modbus exceptions and read timeouts
    #[error("Read error: {0}")]
    ReadError(String),

    /// Failure while closing a transport (logged, never re-raised by eviction)
    #[error("Close error: {0}")]
    CloseError(String),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input/Output errors outside the device transport
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::ValidationError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        GatewayError::ConnectionError(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        GatewayError::ReadError(msg.into())
    }

    pub fn close(msg: impl Into<String>) -> Self {
        GatewayError::CloseError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        GatewayError::ConfigError(msg.into())
    }

    pub fn not_connected() -> Self {
        GatewayError::ConnectionError("Not connected".to_string())
    }

    /// The cause without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Self::ValidationError(msg)
            | Self::ConnectionError(msg)
            | Self::ReadError(msg)
            | Self::CloseError(msg)
            | Self::ConfigError(msg)
            | Self::IoError(msg) => msg,
        }
    }

    /// Stable machine-readable code, reported in error details
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "MODBUSGW_VALIDATION_ERROR",
            Self::ConnectionError(_) => "MODBUSGW_CONNECTION_ERROR",
            Self::ReadError(_) => "MODBUSGW_READ_ERROR",
            Self::CloseError(_) => "MODBUSGW_CLOSE_ERROR",
            Self::ConfigError(_) => "MODBUSGW_CONFIG_ERROR",
            Self::IoError(_) => "MODBUSGW_IO_ERROR",
        }
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        GatewayError::ConfigError(err.to_string())
    }
}

// ============================================================================
// Extension trait for adding context to errors
// ============================================================================

/// Extension trait for adding context to errors
pub trait ErrorExt<T> {
    fn connection_error(self, msg: &str) -> Result<T>;
    fn close_error(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn connection_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatewayError::ConnectionError(format!("{msg}: {e}")))
    }

    fn close_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| GatewayError::CloseError(format!("{msg}: {e}")))
    }
}

// ============================================================================
// API Adaptation: GatewayError → AppError conversion
// ============================================================================

impl From<GatewayError> for common::AppError {
    fn from(err: GatewayError) -> Self {
        let code = err.error_code();
        let app_error = match &err {
            GatewayError::ValidationError(msg) => common::AppError::bad_request(msg.clone()),
            GatewayError::ConnectionError(_) | GatewayError::ReadError(_) => {
                common::AppError::bad_gateway(err.to_string())
            },
            GatewayError::CloseError(_)
            | GatewayError::ConfigError(_)
            | GatewayError::IoError(_) => common::AppError::internal_error(err.to_string()),
        };
        app_error.with_details(format!("error_code: {}", code))
    }
}
