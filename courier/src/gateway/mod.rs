//! Live push gateway.
//!
//! Clients connect over WebSocket with a bearer token, are registered in the
//! [`ConnectionRegistry`] under their user id, and may join named rooms.
//! Services push through [`PushGateway`]; delivery is best-effort and never
//! durable.

pub mod auth;
pub mod protocol;
pub mod registry;
pub mod room;
mod service;
pub mod ws;

pub use auth::{AuthError, Identity, IdentityVerifier, JwtIdentityVerifier};
pub use protocol::{ClientMessage, ServerEvent};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use room::Room;
pub use service::{GatewayConfig, PushGateway};
