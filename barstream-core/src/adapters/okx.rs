//! OKX candlestick payloads.
//!
//! A candle is an array of strings:
//! `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`. `confirm` is "1"
//! once the candle has closed. Older payloads stop after `volCcy`; a candle
//! without `confirm` is treated as closed. The websocket pushes candles under
//! a `candle<bar>` channel, REST wraps them in a `code`/`msg` envelope.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::binance::{decimal, millis, optional_decimal};
use super::AdapterError;
use crate::domain::{Bar, Candle, Interval};

/// One candle as sent by OKX, fields still in wire form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<String>")]
pub struct OkxCandle {
    /// Candle start time (ms).
    pub ts: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    /// Volume in contracts for derivatives, base currency for spot.
    pub vol: String,
    pub vol_ccy: Option<String>,
    pub vol_ccy_quote: Option<String>,
    pub confirm: Option<bool>,
}

impl TryFrom<Vec<String>> for OkxCandle {
    type Error = AdapterError;

    fn try_from(fields: Vec<String>) -> Result<Self, Self::Error> {
        if fields.len() < 6 {
            return Err(AdapterError::Malformed(format!(
                "candle has {} fields, expected at least 6",
                fields.len()
            )));
        }
        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();

        let ts_text = next();
        let ts = ts_text
            .parse::<i64>()
            .map_err(|_| AdapterError::Malformed(format!("candle ts {ts_text:?}")))?;
        let (open, high, low, close, vol) = (next(), next(), next(), next(), next());
        let optional = |s: String| (!s.is_empty()).then_some(s);
        let vol_ccy = optional(next());
        let vol_ccy_quote = optional(next());
        let confirm = match next().as_str() {
            "" => None,
            "0" => Some(false),
            "1" => Some(true),
            other => {
                return Err(AdapterError::Malformed(format!("candle confirm {other:?}")));
            }
        };

        Ok(OkxCandle {
            ts,
            open,
            high,
            low,
            close,
            vol,
            vol_ccy,
            vol_ccy_quote,
            confirm,
        })
    }
}

/// Subscription a websocket push belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkxArg {
    pub channel: String,
    #[serde(rename = "instId")]
    pub inst_id: String,
}

impl OkxArg {
    /// Interval encoded in the channel name, e.g. `candle1H`.
    pub fn interval(&self) -> Option<Interval> {
        self.channel
            .strip_prefix("candle")
            .and_then(parse_bar_interval)
    }
}

/// Websocket push on a `candle*` channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OkxCandleEvent {
    pub arg: OkxArg,
    pub data: Vec<OkxCandle>,
}

impl OkxCandleEvent {
    /// Parse a raw websocket message.
    pub fn from_json(text: &str) -> Result<Self, AdapterError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Candles of this push, oldest first.
    pub fn tickers(&self) -> Result<Vec<OkxTicker>, AdapterError> {
        let interval = self.arg.interval();
        let mut tickers = self
            .data
            .iter()
            .map(|candle| OkxTicker::from_candle(candle, interval))
            .collect::<Result<Vec<_>, _>>()?;
        tickers.sort_by_key(|t| t.bar.begin);
        Ok(tickers)
    }
}

/// REST candles response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OkxCandlesResponse {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<OkxCandle>,
}

impl OkxCandlesResponse {
    pub fn from_json(text: &str) -> Result<Self, AdapterError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Candles oldest first. OKX lists them newest first; a non-zero `code`
    /// is an error.
    pub fn into_tickers(self, interval: Option<Interval>) -> Result<Vec<OkxTicker>, AdapterError> {
        if self.code != "0" {
            return Err(AdapterError::Api {
                code: self.code,
                msg: self.msg,
            });
        }
        let mut tickers = self
            .data
            .iter()
            .map(|candle| OkxTicker::from_candle(candle, interval))
            .collect::<Result<Vec<_>, _>>()?;
        tickers.sort_by_key(|t| t.bar.begin);
        Ok(tickers)
    }
}

/// OKX bar names: minutes in lower case, hours and days in upper case, an
/// optional `utc` suffix. Weeks and months have no [`Interval`].
fn parse_bar_interval(bar: &str) -> Option<Interval> {
    let bar = bar.strip_suffix("utc").unwrap_or(bar);
    match bar.chars().last()? {
        'm' => bar.parse().ok(),
        'H' | 'D' => bar.to_ascii_lowercase().parse().ok(),
        _ => None,
    }
}

/// A bar carrying OKX's extra volume fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkxTicker {
    pub bar: Bar,
    pub vol_ccy: Option<Decimal>,
    pub vol_ccy_quote: Option<Decimal>,
}

impl OkxTicker {
    /// Convert one candle. With a known interval the bar ends one
    /// millisecond before the next period starts; otherwise `end == begin`.
    pub fn from_candle(candle: &OkxCandle, interval: Option<Interval>) -> Result<Self, AdapterError> {
        let begin = millis("ts", candle.ts)?;
        let end = match interval {
            Some(interval) => {
                let span = i64::try_from(interval.millis()).unwrap_or(i64::MAX);
                end_of(begin, span)?
            }
            None => begin,
        };

        let vol_ccy = optional_decimal("volCcy", candle.vol_ccy.as_deref())?;
        let vol_ccy_quote = optional_decimal("volCcyQuote", candle.vol_ccy_quote.as_deref())?;
        let mut bar = Bar::new(
            begin,
            decimal("o", &candle.open)?,
            decimal("h", &candle.high)?,
            decimal("l", &candle.low)?,
            decimal("c", &candle.close)?,
        )
        .with_end(end)
        .with_volume(decimal("vol", &candle.vol)?)
        .finalized(candle.confirm.unwrap_or(true));
        bar.amount = vol_ccy_quote;

        Ok(OkxTicker {
            bar,
            vol_ccy,
            vol_ccy_quote,
        })
    }
}

fn end_of(begin: DateTime<Utc>, span_ms: i64) -> Result<DateTime<Utc>, AdapterError> {
    let ms = begin.timestamp_millis().saturating_add(span_ms - 1);
    millis("ts", ms)
}

impl Candle for OkxTicker {
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
