//! CSV bar files.
//!
//! Columns: `begin_ms,end_ms,open,high,low,close,volume,finalized`, then the
//! optional `amount,buy_volume,buy_amount,trades_count`. Times are Unix
//! milliseconds; prices are decimal strings; an empty `finalized` field means
//! finalized. Optional columns may be absent or empty.

use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::DataError;
use crate::domain::Bar;

#[derive(Debug, Deserialize)]
struct CsvBar {
    begin_ms: i64,
    end_ms: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    finalized: Option<bool>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    buy_volume: Option<String>,
    #[serde(default)]
    buy_amount: Option<String>,
    #[serde(default)]
    trades_count: Option<u64>,
}

fn parse_decimal(line: usize, field: &'static str, value: &str) -> Result<Decimal, DataError> {
    Decimal::from_str(value.trim()).map_err(|e| DataError::InvalidField {
        line,
        field,
        reason: format!("{value:?}: {e}"),
    })
}

fn parse_millis(line: usize, field: &'static str, ms: i64) -> Result<DateTime<Utc>, DataError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| DataError::InvalidField {
        line,
        field,
        reason: format!("{ms} is not a valid timestamp"),
    })
}

fn parse_optional(
    line: usize,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<Decimal>, DataError> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| parse_decimal(line, field, v))
        .transpose()
}

impl CsvBar {
    fn into_bar(self, line: usize) -> Result<Bar, DataError> {
        let begin = parse_millis(line, "begin_ms", self.begin_ms)?;
        let end = parse_millis(line, "end_ms", self.end_ms)?;
        Ok(Bar {
            begin,
            end,
            open: parse_decimal(line, "open", &self.open)?,
            high: parse_decimal(line, "high", &self.high)?,
            low: parse_decimal(line, "low", &self.low)?,
            close: parse_decimal(line, "close", &self.close)?,
            volume: parse_decimal(line, "volume", &self.volume)?,
            finalized: self.finalized.unwrap_or(true),
            amount: parse_optional(line, "amount", self.amount.as_deref())?,
            buy_volume: parse_optional(line, "buy_volume", self.buy_volume.as_deref())?,
            buy_amount: parse_optional(line, "buy_amount", self.buy_amount.as_deref())?,
            trades_count: self.trades_count,
        })
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Load bars from a CSV file with a header row.
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>, DataError> {
    let file = std::fs::File::open(path).map_err(|source| DataError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_bars_csv(file)
}

/// Read bars from any CSV source with a header row.
pub fn read_bars_csv<R: Read>(reader: R) -> Result<Vec<Bar>, DataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    rdr.deserialize::<CsvBar>()
        .enumerate()
        .map(|(i, record)| {
            // Line numbers are 1-based and the header is line 1.
            let line = i + 2;
            record?.into_bar(line)
        })
        .collect()
}

/// Render bars in the same layout `read_bars_csv` accepts.
pub fn write_bars_csv(bars: &[Bar]) -> Result<String, DataError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "begin_ms",
        "end_ms",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "finalized",
        "amount",
        "buy_volume",
        "buy_amount",
        "trades_count",
    ])?;
    for bar in bars {
        wtr.write_record([
            bar.begin.timestamp_millis().to_string(),
            bar.end.timestamp_millis().to_string(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
            bar.finalized.to_string(),
            optional(bar.amount),
            optional(bar.buy_volume),
            optional(bar.buy_amount),
            optional(bar.trades_count),
        ])?;
    }
    let data = wtr
        .into_inner()
        .map_err(|e| DataError::Csv(e.into_error().into()))?;
    String::from_utf8(data).map_err(|e| DataError::InvalidField {
        line: 0,
        field: "output",
        reason: e.to_string(),
    })
}
