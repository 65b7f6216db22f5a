//! Domain types: bars and their intervals.

pub mod bar;
pub mod interval;

pub use bar::{Bar, Candle};
pub use interval::{Interval, ParseIntervalError};
