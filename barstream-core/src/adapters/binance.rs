//! Binance kline payloads.
//!
//! The websocket stream wraps each kline in an event envelope under `k`;
//! prices and volumes arrive as decimal strings, times as Unix milliseconds.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AdapterError;
use crate::domain::{Bar, Candle, Interval};

/// One kline as sent by Binance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinanceKline {
    /// Kline start time (ms).
    #[serde(rename = "t")]
    pub start_time: i64,
    /// Kline close time (ms).
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "v")]
    pub volume: String,
    /// Whether the kline is closed.
    #[serde(rename = "x")]
    pub is_closed: bool,
    #[serde(rename = "q", default, skip_serializing_if = "Option::is_none")]
    pub quote_volume: Option<String>,
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub trades: Option<u64>,
    #[serde(rename = "V", default, skip_serializing_if = "Option::is_none")]
    pub taker_buy_volume: Option<String>,
    #[serde(rename = "Q", default, skip_serializing_if = "Option::is_none")]
    pub taker_buy_quote_volume: Option<String>,
}

/// Websocket envelope around a kline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinanceKlineEvent {
    #[serde(rename = "e", default)]
    pub event_type: String,
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "s", default)]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: BinanceKline,
}

/// A bar carrying the exchange's extra kline fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineTicker {
    pub bar: Bar,
    pub quote_volume: Option<Decimal>,
    pub trades: Option<u64>,
}

pub(super) fn decimal(field: &'static str, value: &str) -> Result<Decimal, AdapterError> {
    Decimal::from_str(value).map_err(|e| AdapterError::InvalidDecimal {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

pub(super) fn optional_decimal(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<Decimal>, AdapterError> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| decimal(field, v))
        .transpose()
}

pub(super) fn millis(field: &'static str, ms: i64) -> Result<DateTime<Utc>, AdapterError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(AdapterError::InvalidTimestamp { field, ms })
}

impl TryFrom<BinanceKline> for KlineTicker {
    type Error = AdapterError;

    fn try_from(k: BinanceKline) -> Result<Self, Self::Error> {
        let mut bar = Bar::new(
            millis("t", k.start_time)?,
            decimal("o", &k.open)?,
            decimal("h", &k.high)?,
            decimal("l", &k.low)?,
            decimal("c", &k.close)?,
        )
        .with_end(millis("T", k.close_time)?)
        .with_volume(decimal("v", &k.volume)?)
        .finalized(k.is_closed);

        let quote_volume = optional_decimal("q", k.quote_volume.as_deref())?;
        bar.amount = quote_volume;
        bar.buy_volume = optional_decimal("V", k.taker_buy_volume.as_deref())?;
        bar.buy_amount = optional_decimal("Q", k.taker_buy_quote_volume.as_deref())?;
        bar.trades_count = k.trades;

        Ok(KlineTicker {
            bar,
            quote_volume,
            trades: k.trades,
        })
    }
}

impl TryFrom<BinanceKline> for Bar {
    type Error = AdapterError;

    fn try_from(k: BinanceKline) -> Result<Self, Self::Error> {
        KlineTicker::try_from(k).map(|ticker| ticker.bar)
    }
}

impl TryFrom<BinanceKlineEvent> for KlineTicker {
    type Error = AdapterError;

    fn try_from(event: BinanceKlineEvent) -> Result<Self, Self::Error> {
        KlineTicker::try_from(event.kline)
    }
}

impl BinanceKlineEvent {
    /// Parse a raw websocket message.
    pub fn from_json(text: &str) -> Result<Self, AdapterError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Candle for KlineTicker {
    fn begin(&self) -> DateTime<Utc> {
        self.bar.begin
    }

    fn end(&self) -> DateTime<Utc> {
        self.bar.end
    }

    fn open(&self) -> Decimal {
        self.bar.open
    }

    fn high(&self) -> Decimal {
        self.bar.high
    }

    fn low(&self) -> Decimal {
        self.bar.low
    }

    fn close(&self) -> Decimal {
        self.bar.close
    }

    fn volume(&self) -> Decimal {
        self.bar.volume
    }

    fn is_finalized(&self) -> bool {
        self.bar.finalized
    }
}
