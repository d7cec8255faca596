//! Field checks shared by the config sections

use std::fmt::Display;
use thiserror::Error;

/// A config field holding a value outside its allowed set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} {message}{}", got(.value))]
pub struct ValidationError {
    /// Dotted path such as `retry.max_retries`
    pub field: String,
    pub message: String,
    /// The rejected value, when it can be shown
    pub value: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl ToString,
    ) -> Self {
        Self {
            value: Some(value.to_string()),
            ..Self::new(field, message)
        }
    }
}

fn got(value: &Option<String>) -> String {
    value
        .as_ref()
        .map(|v| format!(" (got {})", v))
        .unwrap_or_default()
}

/// One `[section]` of the config file
pub trait ConfigSection: Default {
    /// Every problem in the section, not just the first
    fn validate(&self) -> Result<(), Vec<ValidationError>>;

    /// Takes every value from `other`
    fn merge(&mut self, other: Self);

    /// Table name in the file
    fn section_name(&self) -> &'static str;
}

/// Field checks; each returns the error for one field
pub struct Validator;

impl Validator {
    /// `min <= value <= max`
    pub fn in_range<T>(value: T, min: T, max: T, field: &str) -> Result<(), ValidationError>
    where
        T: PartialOrd + Display + Copy,
    {
        if value < min || value > max {
            return Err(ValidationError::with_value(
                field,
                format!("must be between {} and {}", min, max),
                value,
            ));
        }
        Ok(())
    }

    /// Budgets of zero would block admission forever
    pub fn positive<T>(value: T, field: &str) -> Result<(), ValidationError>
    where
        T: PartialOrd + Default + Display + Copy,
    {
        if value > T::default() {
            return Ok(());
        }
        Err(ValidationError::with_value(field, "must be greater than 0", value))
    }

    /// A window must split into whole sub-intervals
    pub fn multiple_of(value: u64, unit: u64, field: &str) -> Result<(), ValidationError> {
        if unit > 0 && value >= unit && value % unit == 0 {
            return Ok(());
        }
        Err(ValidationError::with_value(
            field,
            format!("must be a whole multiple of {}", unit),
            value,
        ))
    }

    pub fn not_empty(value: &str, field: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new(field, "must not be empty"));
        }
        Ok(())
    }

    /// Keeps the failures of a section's checks
    pub fn collect_errors<I>(results: I) -> Result<(), Vec<ValidationError>>
    where
        I: IntoIterator<Item = Result<(), ValidationError>>,
    {
        let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
