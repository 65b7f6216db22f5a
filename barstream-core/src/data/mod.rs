//! Loading bars from files.

pub mod csv;

pub use self::csv::{load_bars_csv, read_bars_csv, write_bars_csv};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("line {line}: invalid {field}: {reason}")]
    InvalidField {
        line: usize,
        field: &'static str,
        reason: String,
    },
}
