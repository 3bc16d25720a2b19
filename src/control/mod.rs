//! Zone decision engine.

pub mod controller;

use thiserror::Error;

pub use controller::{ControllerSnapshot, ZoneController};

/// Fan zone, 0 (stopped) to 3.
pub type Zone = u8;

/// An inbound sample as it arrived from a telemetry source.
///
/// Sources hand over whatever shape they decoded; validation happens in the
/// controller so booleans and non-finite values can be rejected uniformly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl SampleValue {
    /// Finite numeric value.
    pub fn as_number(self) -> Result<f64, SampleError> {
        match self {
            SampleValue::Integer(v) => Ok(v as f64),
            SampleValue::Float(v) if v.is_finite() => Ok(v),
            SampleValue::Float(v) => Err(SampleError::NotFinite(v)),
            SampleValue::Boolean(_) => Err(SampleError::Boolean),
        }
    }

    /// Finite numeric value, truncated toward zero.
    pub fn to_integer(self) -> Result<i64, SampleError> {
        match self {
            SampleValue::Integer(v) => Ok(v),
            SampleValue::Float(v) if v.is_finite() => Ok(v.trunc() as i64),
            SampleValue::Float(v) => Err(SampleError::NotFinite(v)),
            SampleValue::Boolean(_) => Err(SampleError::Boolean),
        }
    }
}

impl std::fmt::Display for SampleValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleValue::Integer(v) => write!(f, "{}", v),
            SampleValue::Float(v) => write!(f, "{}", v),
            SampleValue::Boolean(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for SampleValue {
    fn from(value: i64) -> Self {
        SampleValue::Integer(value)
    }
}

impl From<i32> for SampleValue {
    fn from(value: i32) -> Self {
        SampleValue::Integer(value as i64)
    }
}

impl From<u32> for SampleValue {
    fn from(value: u32) -> Self {
        SampleValue::Integer(value as i64)
    }
}

impl From<u16> for SampleValue {
    fn from(value: u16) -> Self {
        SampleValue::Integer(value as i64)
    }
}

impl From<u8> for SampleValue {
    fn from(value: u8) -> Self {
        SampleValue::Integer(value as i64)
    }
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self {
        SampleValue::Float(value)
    }
}

impl From<bool> for SampleValue {
    fn from(value: bool) -> Self {
        SampleValue::Boolean(value)
    }
}

/// Why a sample was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("boolean is not a valid sample")]
    Boolean,

    #[error("non-finite sample: {0}")]
    NotFinite(f64),

    #[error("{value} is outside {min}-{max}")]
    OutOfRange { value: f64, min: i64, max: i64 },
}
