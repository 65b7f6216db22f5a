//! Error type shared by the series store, the indicator cache and the scheduler.

use thiserror::Error;

/// Errors returned by series, cache and scheduler operations.
///
/// Delivery through the relay never fails; everything else reports through
/// this enum synchronously to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesError {
    #[error("position {position} out of range (size {size})")]
    IndexOutOfRange { position: usize, size: usize },

    /// The cached results can no longer be mapped onto the store's positions.
    #[error("indicator cache is misaligned with its series")]
    MisalignedSeries,

    #[error("nil bar in update batch")]
    NilBar,

    #[error("arithmetic {op} overflowed or divided by zero in {context}")]
    Arithmetic { op: &'static str, context: String },

    #[error("calculation panicked: {0}")]
    CalculationPanicked(String),

    #[error("indicator {0} has no attribute source")]
    SourceNotSet(String),

    #[error("failed to spawn live thread: {0}")]
    Spawn(String),
}

impl SeriesError {
    pub(crate) fn out_of_range(position: usize, size: usize) -> Self {
        SeriesError::IndexOutOfRange { position, size }
    }

    pub(crate) fn arithmetic(op: &'static str, context: impl Into<String>) -> Self {
        SeriesError::Arithmetic {
            op,
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = SeriesError::out_of_range(7, 3);
        assert_eq!(err.to_string(), "position 7 out of range (size 3)");

        let err = SeriesError::arithmetic("div", "sma_3");
        assert_eq!(
            err.to_string(),
            "arithmetic div overflowed or divided by zero in sma_3"
        );
    }
}
