//! # Push HTTP Server Module
//!
//! Reference transport for the push facility: an Axum server exposing the
//! WebSocket endpoint clients connect to, plus a small JSON API for
//! publishing and scope expiry.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `/api/stats` - Registry sizes and counters
//! - `/push/{channel}` - WebSocket endpoint
//! - `/api/channels/{name}/messages` - Publish
//! - `/api/scopes/{scope_id}` - Scope expiry

pub mod config;
pub mod observability_routes;
pub mod push_routes;
pub mod server;

pub use config::HttpServerConfig;
pub use push_routes::{ErrorResponse, PublishRequest, PublishResponse, PUSH_USER_HEADER};
pub use server::HttpServer;
