//! Ambient telemetry stack: process logger and the HTTP scrape/lifecycle server.

pub mod logging;
pub mod server;
