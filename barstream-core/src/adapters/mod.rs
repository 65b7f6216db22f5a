//! Exchange payload adapters producing [`crate::domain::Candle`] values.

pub mod binance;
pub mod okx;

pub use binance::{BinanceKline, BinanceKlineEvent, KlineTicker};
pub use okx::{OkxCandle, OkxCandleEvent, OkxCandlesResponse, OkxTicker};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid decimal in {field}: {value:?} ({reason})")]
    InvalidDecimal {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid timestamp in {field}: {ms}")]
    InvalidTimestamp { field: &'static str, ms: i64 },

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("exchange error {code}: {msg}")]
    Api { code: String, msg: String },
}
