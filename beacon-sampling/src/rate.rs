use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw sample rate as configured or returned by a sampler.
///
/// Booleans are accepted as shorthand for `1.0` and `0.0`. Any other value is kept verbatim so
/// that validation can report what was actually supplied.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SampleRate {
    /// `true` samples everything, `false` nothing.
    Bool(bool),
    /// A probability that should be within `[0, 1]`.
    Number(f64),
    /// Any value of an unsupported type.
    Other(Value),
}

impl SampleRate {
    /// Validates the rate and returns it as a probability.
    ///
    /// # Example
    ///
    /// ```
    /// use beacon_sampling::{InvalidSampleRate, SampleRate};
    ///
    /// assert_eq!(SampleRate::Bool(true).validate(), Ok(1.0));
    /// assert_eq!(SampleRate::Number(0.25).validate(), Ok(0.25));
    /// assert_eq!(SampleRate::Number(1.5).validate(), Err(InvalidSampleRate::OutOfRange(1.5)));
    /// ```
    pub fn validate(&self) -> Result<f64, InvalidSampleRate> {
        match *self {
            SampleRate::Bool(true) => Ok(1.0),
            SampleRate::Bool(false) => Ok(0.0),
            SampleRate::Number(rate) if rate.is_nan() => Err(InvalidSampleRate::NotANumber),
            SampleRate::Number(rate) if !(0.0..=1.0).contains(&rate) => {
                Err(InvalidSampleRate::OutOfRange(rate))
            }
            SampleRate::Number(rate) => Ok(rate),
            SampleRate::Other(ref value) => Err(InvalidSampleRate::InvalidType(value.to_string())),
        }
    }
}

impl From<f64> for SampleRate {
    fn from(rate: f64) -> Self {
        Self::Number(rate)
    }
}

impl From<bool> for SampleRate {
    fn from(sampled: bool) -> Self {
        Self::Bool(sampled)
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleRate::Bool(value) => fmt::Display::fmt(value, f),
            SampleRate::Number(value) => fmt::Display::fmt(value, f),
            SampleRate::Other(value) => fmt::Display::fmt(value, f),
        }
    }
}

/// The reason a [`SampleRate`] was rejected.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum InvalidSampleRate {
    /// The rate is neither a boolean nor a number.
    #[error("sample rate must be a boolean or a number between 0 and 1, got {0}")]
    InvalidType(String),
    /// The rate is `NaN`.
    #[error("sample rate must be a boolean or a number between 0 and 1, got NaN")]
    NotANumber,
    /// The rate is a number outside of `[0, 1]`.
    #[error("sample rate must be between 0 and 1, got {0}")]
    OutOfRange(f64),
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_validate_bounds_inclusive() {
        assert_eq!(SampleRate::Number(0.0).validate(), Ok(0.0));
        assert_eq!(SampleRate::Number(1.0).validate(), Ok(1.0));
        assert_eq!(
            SampleRate::Number(-0.1).validate(),
            Err(InvalidSampleRate::OutOfRange(-0.1))
        );
        assert_eq!(
            SampleRate::Number(f64::INFINITY).validate(),
            Err(InvalidSampleRate::OutOfRange(f64::INFINITY))
        );
    }

    #[test]
    fn test_validate_nan() {
        assert_eq!(
            SampleRate::Number(f64::NAN).validate(),
            Err(InvalidSampleRate::NotANumber)
        );
    }

    #[test]
    fn test_validate_invalid_type() {
        let rate = SampleRate::Other(Value::String("0.5".to_owned()));
        let error = rate.validate().unwrap_err();
        assert_eq!(error, InvalidSampleRate::InvalidType("\"0.5\"".to_owned()));
        assert_eq!(
            error.to_string(),
            "sample rate must be a boolean or a number between 0 and 1, got \"0.5\""
        );
    }

    #[test]
    fn test_deserialize() {
        let rate: SampleRate = serde_json::from_str("0.5").unwrap();
        assert_eq!(rate, SampleRate::Number(0.5));

        let rate: SampleRate = serde_json::from_str("1").unwrap();
        assert_eq!(rate, SampleRate::Number(1.0));

        let rate: SampleRate = serde_json::from_str("false").unwrap();
        assert_eq!(rate, SampleRate::Bool(false));

        let rate: SampleRate = serde_json::from_str(r#""all""#).unwrap();
        assert_eq!(rate, SampleRate::Other(Value::String("all".to_owned())));
    }
}
