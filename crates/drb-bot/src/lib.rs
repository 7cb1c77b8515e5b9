//! Deribit session client application.
//!
//! Wires the shared token refresher, the streaming connection and the order
//! client into one `Session`, configured from TOML and driven by the CLI.

pub mod config;
pub mod error;
pub mod session;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use session::{await_response, Session};
