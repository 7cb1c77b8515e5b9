//! Order-related types and identifiers.
//!
//! Provides order side, order type, option leg, and client label types,
//! plus the typed order request sent to `private/buy` / `private/sell`.

use crate::error::{CoreError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// JSON-RPC method used to place an order on this side.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Buy => "private/buy",
            Self::Sell => "private/sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Limit order. Requires a price.
    Limit,
    /// Market order.
    #[default]
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "limit" => Ok(Self::Limit),
            "market" => Ok(Self::Market),
            other => Err(CoreError::InvalidOrder(format!("unknown order type: {other}"))),
        }
    }
}

/// Option leg type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

impl std::str::FromStr for OptionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "call" => Ok(Self::Call),
            "put" => Ok(Self::Put),
            other => Err(CoreError::InvalidOrder(format!("unknown option type: {other}"))),
        }
    }
}

/// Client-side order label, echoed back by the exchange.
///
/// Lets log lines for the request and the ack be joined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderLabel(String);

impl OrderLabel {
    /// Create a new unique label.
    ///
    /// Format: `drb_{timestamp_ms}_{uuid_short}`
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("drb_{ts}_{uuid_short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OrderLabel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderLabel {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Order placement request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    #[serde(rename = "instrument_name")]
    pub instrument: String,
    #[serde(skip)]
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub price: Option<Decimal>,
    #[serde(rename = "expiry_date", skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(
        rename = "strike_price",
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub strike: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_type: Option<OptionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<OrderLabel>,
}

impl OrderRequest {
    /// Market order.
    pub fn market(instrument: impl Into<String>, side: OrderSide, amount: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            expiry: None,
            strike: None,
            option_type: None,
            label: None,
        }
    }

    /// Limit order at `price`.
    pub fn limit(
        instrument: impl Into<String>,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market(instrument, side, amount)
        }
    }

    pub fn with_expiry(mut self, expiry: impl Into<String>) -> Self {
        self.expiry = Some(expiry.into());
        self
    }

    /// Attach an option leg (strike + call/put).
    pub fn with_option(mut self, strike: Decimal, option_type: OptionType) -> Self {
        self.strike = Some(strike);
        self.option_type = Some(option_type);
        self
    }

    pub fn with_label(mut self, label: OrderLabel) -> Self {
        self.label = Some(label);
        self
    }

    /// JSON-RPC method for this order.
    pub fn method(&self) -> &'static str {
        self.side.method()
    }

    /// Validate the request before it goes on the wire.
    pub fn validate(&self) -> Result<()> {
        if self.instrument.trim().is_empty() {
            return Err(CoreError::InvalidOrder("instrument is empty".to_string()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(CoreError::InvalidOrder(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => {
                return Err(CoreError::InvalidOrder("limit order requires a price".to_string()))
            }
            (_, Some(price)) if price <= Decimal::ZERO => {
                return Err(CoreError::InvalidOrder(format!(
                    "price must be positive, got {price}"
                )))
            }
            _ => {}
        }
        if self.strike.is_some() != self.option_type.is_some() {
            return Err(CoreError::InvalidOrder(
                "option leg requires both strike and option type".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the JSON-RPC `params` object.
    pub fn to_params(&self) -> Result<serde_json::Value> {
        self.validate()?;
        Ok(serde_json::to_value(self)?)
    }
}
