use thiserror::Error;

use crate::protocol::RawMetricEvent;

/// Default maximum length in bytes of feature, application and environment names.
pub const DEFAULT_MAX_NAME_LENGTH: usize = 255;

/// A submitted metric event violates a field constraint.
///
/// Carries the position of the first offending event in the submitted batch. A batch containing
/// an invalid event is rejected as a whole.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid metric event at index {index}: {kind}")]
pub struct ValidationError {
    index: usize,
    kind: ValidationErrorKind,
}

impl ValidationError {
    pub(crate) fn new(index: usize, kind: ValidationErrorKind) -> Self {
        Self { index, kind }
    }

    /// Position of the offending event within the batch.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The violated constraint.
    pub fn kind(&self) -> &ValidationErrorKind {
        &self.kind
    }
}

/// The reason a metric event was rejected.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// An identity field was empty.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    /// An identity field exceeded the configured length.
    #[error("{field} is {length} bytes long, at most {max} are allowed")]
    FieldTooLong {
        /// Name of the field.
        field: &'static str,
        /// Length of the submitted value in bytes.
        length: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A count was below zero.
    #[error("{field} must not be negative, got {value}")]
    NegativeCount {
        /// Name of the field.
        field: &'static str,
        /// The submitted count.
        value: i64,
    },
    /// Summing the counts of the batch exceeded the counter range.
    #[error("counter overflow while summing {0}")]
    CountOverflow(&'static str),
}

fn validate_name(
    field: &'static str,
    value: &str,
    max_name_length: usize,
) -> Result<(), ValidationErrorKind> {
    if value.is_empty() {
        return Err(ValidationErrorKind::EmptyField(field));
    }

    if value.len() > max_name_length {
        return Err(ValidationErrorKind::FieldTooLong {
            field,
            length: value.len(),
            max: max_name_length,
        });
    }

    Ok(())
}

fn validate_count(field: &'static str, value: i64) -> Result<(), ValidationErrorKind> {
    if value < 0 {
        return Err(ValidationErrorKind::NegativeCount { field, value });
    }

    Ok(())
}

/// Checks the field constraints of a single event.
///
/// `index` is the position of the event in its batch and is reported back in the error.
pub fn validate_event(
    index: usize,
    event: &RawMetricEvent,
    max_name_length: usize,
) -> Result<(), ValidationError> {
    let check = || {
        validate_name("featureName", &event.feature_name, max_name_length)?;
        validate_name("appName", &event.app_name, max_name_length)?;
        validate_name("environment", &event.environment, max_name_length)?;
        validate_count("yes", event.yes)?;
        validate_count("no", event.no)
    };

    check().map_err(|kind| ValidationError::new(index, kind))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn event() -> RawMetricEvent {
        RawMetricEvent {
            feature_name: "demo".to_owned(),
            app_name: "web".to_owned(),
            environment: "dev".to_owned(),
            timestamp: Utc
                .with_ymd_and_hms(2024, 3, 9, 10, 10, 11)
                .unwrap()
                .fixed_offset(),
            yes: 2,
            no: 2,
        }
    }

    #[test]
    fn test_valid_event() {
        assert_eq!(validate_event(0, &event(), DEFAULT_MAX_NAME_LENGTH), Ok(()));
    }

    #[test]
    fn test_zero_counts_are_valid() {
        let event = RawMetricEvent {
            yes: 0,
            no: 0,
            ..event()
        };
        assert_eq!(validate_event(0, &event, DEFAULT_MAX_NAME_LENGTH), Ok(()));
    }

    #[test]
    fn test_empty_names() {
        let cases = [
            (
                RawMetricEvent {
                    feature_name: String::new(),
                    ..event()
                },
                "featureName",
            ),
            (
                RawMetricEvent {
                    app_name: String::new(),
                    ..event()
                },
                "appName",
            ),
            (
                RawMetricEvent {
                    environment: String::new(),
                    ..event()
                },
                "environment",
            ),
        ];

        for (event, field) in cases {
            let err = validate_event(3, &event, DEFAULT_MAX_NAME_LENGTH).unwrap_err();
            assert_eq!(err.index(), 3);
            assert_eq!(err.kind(), &ValidationErrorKind::EmptyField(field));
        }
    }

    #[test]
    fn test_negative_counts() {
        let event = RawMetricEvent {
            no: -4,
            ..event()
        };
        let err = validate_event(1, &event, DEFAULT_MAX_NAME_LENGTH).unwrap_err();
        assert_eq!(
            err.kind(),
            &ValidationErrorKind::NegativeCount {
                field: "no",
                value: -4
            }
        );
        assert_eq!(
            err.to_string(),
            "invalid metric event at index 1: no must not be negative, got -4"
        );
    }

    #[test]
    fn test_name_too_long() {
        let event = RawMetricEvent {
            app_name: "a".repeat(11),
            ..event()
        };
        let err = validate_event(0, &event, 10).unwrap_err();
        assert_eq!(
            err.kind(),
            &ValidationErrorKind::FieldTooLong {
                field: "appName",
                length: 11,
                max: 10
            }
        );
    }
}
