//! Error kinds shared across the pipeline.

use std::fmt;

/// The pipeline's error kinds. Drivers, the coordinator command surface, and
/// the settings adapter all report through these; `NoData` is a valid state
/// rather than a failure and only appears where a caller asked for a value
/// that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Argument outside its accepted range (unknown sensor, bad calibration
    /// reference).
    InvalidArg,
    /// Operation illegal in the current sensor state.
    InvalidState,
    /// I/O or sync-response exceeded its budget.
    Timeout,
    /// Transport-layer failure (framing, CRC, NACK).
    Bus(String),
    /// Operation not implemented for this sensor.
    Unsupported,
    /// Command queue full or ring wrapped without consumption.
    Overflow,
    /// No data available yet.
    NoData,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArg => write!(f, "invalid argument"),
            Self::InvalidState => write!(f, "invalid state for operation"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::Bus(detail) => write!(f, "bus error: {detail}"),
            Self::Unsupported => write!(f, "operation not supported"),
            Self::Overflow => write!(f, "queue overflow"),
            Self::NoData => write!(f, "no data"),
        }
    }
}

impl std::error::Error for Error {}
