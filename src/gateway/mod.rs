//! Command Gateway
//!
//! A local WebSocket for the operator console: commands in, status, log,
//! screenshot and statistics events out.

pub mod protocol;
pub mod reporter;
pub mod server;

pub use protocol::{Command, ConsoleStatus, Event, SwipeGesture, TapTarget};
pub use reporter::Reporter;
pub use server::Gateway;

/// Default console address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8765";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
