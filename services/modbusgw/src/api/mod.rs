//! API module for the Modbus gateway
//!
//! REST endpoints, request/response models and route definitions.

pub mod handlers;
pub mod models;
pub mod routes;
