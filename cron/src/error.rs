//! Parse errors for cron expressions.
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected 5, 6 or 7 fields, found {0}")]
    WrongFieldCount(usize),

    #[error("invalid value {value:?} for field {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("value {value} out of range [{min}, {max}] for field {field}")]
    OutOfRange { field: &'static str, value: u32, min: u32, max: u32 },

    #[error("step must be a positive integer, found {0:?}")]
    InvalidStep(String),
}
