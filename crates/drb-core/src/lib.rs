//! Core types for the Deribit session client.
//!
//! This crate provides the vocabulary shared by every transport:
//! - `RpcRequest`, `RpcResponse`, `RpcNotification`: JSON-RPC 2.0 envelope
//! - `Channel`: streaming channel names (`book.<instrument>.raw`, ...)
//! - `OrderRequest`, `OrderSide`, `OrderType`: typed order parameters
//! - `EventSink`, `Category`: the categorized sink interface consumed by the core

pub mod channel;
pub mod error;
pub mod order;
pub mod rpc;
pub mod sink;

pub use channel::{Channel, BOOK_PREFIX, TICKER_PREFIX};
pub use error::{CoreError, Result};
pub use order::{OptionType, OrderLabel, OrderRequest, OrderSide, OrderType};
pub use rpc::{RpcErrorPayload, RpcNotification, RpcRequest, RpcResponse, JSONRPC_VERSION};
pub use sink::{Category, EventSink, InboundMessage, NullSink};
