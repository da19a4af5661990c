// =============================================================================
// API Module
// =============================================================================
//
// HTTP surface of the decision service:
// - REST endpoints for ingest, rule administration and evaluation
// - Bearer token authentication
// - WebSocket push feed of new decisions

pub mod auth;
pub mod rest;
pub mod ws;

pub use rest::router;
