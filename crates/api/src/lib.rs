//! HTTP API: configuration, routing, auth middleware and the WebSocket
//! bridge into the notification hub.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
pub mod ws;
