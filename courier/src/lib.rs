//! courier library crate.
//!
//! Notification delivery: a durable mail queue drained by a background
//! dispatcher, a WebSocket push gateway, and an orchestrator that turns
//! domain events into both.

pub mod api;
pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod mail;
pub mod orchestrator;

pub use error::{Error, Result};
