//! Streaming channel names.
//!
//! Grammar: `book.<instrument>.raw`, `ticker.<instrument>.raw`.

use crate::error::{CoreError, Result};

/// Order book channel prefix.
pub const BOOK_PREFIX: &str = "book.";
/// Ticker (market trade) channel prefix.
pub const TICKER_PREFIX: &str = "ticker.";
/// Update interval suffix used for every channel we subscribe to.
const RAW_SUFFIX: &str = ".raw";

/// Channel name builders.
pub struct Channel;

impl Channel {
    /// `book.<instrument>.raw`
    pub fn order_book(instrument: &str) -> String {
        format!("{BOOK_PREFIX}{instrument}{RAW_SUFFIX}")
    }

    /// `ticker.<instrument>.raw`
    pub fn ticker(instrument: &str) -> String {
        format!("{TICKER_PREFIX}{instrument}{RAW_SUFFIX}")
    }

    /// Order book channels for a list of instruments.
    pub fn order_books<S: AsRef<str>>(instruments: &[S]) -> Vec<String> {
        instruments
            .iter()
            .map(|i| Self::order_book(i.as_ref()))
            .collect()
    }

    /// Ticker channels for a list of instruments.
    pub fn tickers<S: AsRef<str>>(instruments: &[S]) -> Vec<String> {
        instruments.iter().map(|i| Self::ticker(i.as_ref())).collect()
    }

    /// Check that an instrument name can be embedded in a channel.
    pub fn validate_instrument(instrument: &str) -> Result<()> {
        if instrument.is_empty() || instrument.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidChannel(format!(
                "invalid instrument name: {instrument:?}"
            )));
        }
        Ok(())
    }
}
