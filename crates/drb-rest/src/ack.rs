//! Typed acknowledgements for order calls.

use crate::error::{RestError, RestResult};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// Order as echoed back by the exchange.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderSummary {
    pub order_id: String,
    #[serde(default)]
    pub order_state: Option<String>,
    #[serde(default)]
    pub instrument_name: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub filled_amount: Option<Decimal>,
    /// Number for limit orders, `"market_price"` for market orders.
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Result of `private/buy`, `private/sell` and `private/edit`.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order: OrderSummary,
    pub trades: Vec<Value>,
    pub raw: Value,
}

#[derive(Deserialize)]
struct OrderResult {
    order: OrderSummary,
    #[serde(default)]
    trades: Vec<Value>,
}

impl OrderAck {
    pub fn from_result(result: Value) -> RestResult<Self> {
        let parsed: OrderResult = serde_json::from_value(result.clone())
            .map_err(|e| RestError::Protocol(format!("unexpected order result: {e}")))?;
        Ok(Self {
            order: parsed.order,
            trades: parsed.trades,
            raw: result,
        })
    }

    pub fn order_id(&self) -> &str {
        &self.order.order_id
    }
}

/// Result of `private/cancel`.
#[derive(Debug, Clone)]
pub struct CancelAck {
    pub order: OrderSummary,
    pub raw: Value,
}

impl CancelAck {
    pub fn from_result(result: Value) -> RestResult<Self> {
        let order: OrderSummary = serde_json::from_value(result.clone())
            .map_err(|e| RestError::Protocol(format!("unexpected cancel result: {e}")))?;
        Ok(Self { order, raw: result })
    }

    pub fn order_id(&self) -> &str {
        &self.order.order_id
    }
}
