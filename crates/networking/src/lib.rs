//! Live delivery and HTTP surface of the exchange
//!
//! This crate hosts the connection registry that fans events out to every
//! live client channel, the WebSocket frame protocol, the per-connection
//! session that dispatches inbound frames, and the axum router that exposes
//! the exchange over HTTP.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use auth::{AuthError, Authenticator, Claims, JwtAuthenticator};
pub use protocol::{encode_event, parse_frame, InboundFrame, CLOSE_NORMAL, CLOSE_UNAUTHENTICATED};
pub use registry::{ChannelId, ChannelReceiver, ConnectionRegistry, LiveChannel};
pub use server::{router, ApiError, AppState, AuthUser};
pub use session::{FrameOutcome, LiveSession, RegistrationGuard};
