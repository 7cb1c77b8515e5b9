//! Order entry over the JSON-RPC HTTP surface.
//!
//! Places, modifies and cancels orders with a bearer token from the shared
//! [`drb_auth::TokenRefresher`]. Every call reports its raw response as an
//! order event and its round-trip time as a latency sample.

pub mod ack;
pub mod client;
pub mod error;

pub use ack::{CancelAck, OrderAck, OrderSummary};
pub use client::RestClient;
pub use error::{RestError, RestResult};
