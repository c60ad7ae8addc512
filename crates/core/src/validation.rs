//! Field-level validation results and shared range/length checks.
//!
//! Entities never fail fast: every check appends a [`FieldError`] to a
//! [`ValidationErrors`] list so callers see all problems at once.

use serde::{Deserialize, Serialize};

/// Machine-readable reason for a field failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    Required,
    TooLong,
    OutOfRange,
    NonPositiveDimension,
    NegativeSurfaceArea,
    UnsupportedModelFormat,
    TimestampOrder,
    FutureTimestamp,
    MissingWorkpiece,
    EmptyPoints,
    IndexDiscontinuity,
    NonPositiveSpeed,
    FlowRateOutOfRange,
    NegativeDwellTime,
    NonUnitOrientation,
    MembershipLimit,
}

/// A single field-level violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: ValidationCode,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

/// Accumulated violations for one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    pub fn add(&mut self, field: &str, code: ValidationCode, message: impl Into<String>) {
        self.push(FieldError::new(field, code, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Whether any violation carries `code`.
    pub fn has(&self, code: ValidationCode) -> bool {
        self.0.iter().any(|e| e.code == code)
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl IntoIterator for ValidationErrors {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<&str> = self.0.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

// ---------------------------------------------------------------------------
// Shared checks
// ---------------------------------------------------------------------------

/// Required text, at most `max_chars` characters (counted as chars, not bytes).
pub fn check_text(errors: &mut ValidationErrors, field: &str, value: &str, max_chars: usize) {
    if value.trim().is_empty() {
        errors.add(field, ValidationCode::Required, format!("{field} is required"));
        return;
    }
    check_max_len(errors, field, value, max_chars);
}

/// Optional text limited to `max_chars` characters.
pub fn check_max_len(errors: &mut ValidationErrors, field: &str, value: &str, max_chars: usize) {
    if value.chars().count() > max_chars {
        errors.add(
            field,
            ValidationCode::TooLong,
            format!("{field} must be at most {max_chars} characters"),
        );
    }
}

/// Value must fall within `[min, max]`. NaN always fails.
pub fn check_range(errors: &mut ValidationErrors, field: &str, value: f64, min: f64, max: f64) {
    if !(min..=max).contains(&value) {
        errors.add(
            field,
            ValidationCode::OutOfRange,
            format!("{field} must be between {min} and {max}, got {value}"),
        );
    }
}

/// Clamp into `[min, max]`, mapping NaN to `min`.
pub fn clamp_or_min(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_required() {
        let mut errors = ValidationErrors::new();
        check_text(&mut errors, "name", "   ", 10);
        assert!(errors.has(ValidationCode::Required));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn length_counts_characters() {
        let mut errors = ValidationErrors::new();
        check_text(&mut errors, "name", "工件工件", 4);
        assert!(errors.is_empty());
        check_text(&mut errors, "name", "工件工件工", 4);
        assert!(errors.has(ValidationCode::TooLong));
    }

    #[test]
    fn range_accepts_boundaries_and_rejects_nan() {
        let mut errors = ValidationErrors::new();
        check_range(&mut errors, "q", 0.0, 0.0, 1.0);
        check_range(&mut errors, "q", 1.0, 0.0, 1.0);
        assert!(errors.is_empty());
        check_range(&mut errors, "q", f64::NAN, 0.0, 1.0);
        assert!(errors.has(ValidationCode::OutOfRange));
    }

    #[test]
    fn clamp_handles_nan() {
        assert_eq!(clamp_or_min(f64::NAN, 0.0, 1.0), 0.0);
        assert_eq!(clamp_or_min(1.5, 0.0, 1.0), 1.0);
        assert_eq!(clamp_or_min(-2.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn into_result_reports_all_errors() {
        let mut errors = ValidationErrors::new();
        errors.add("a", ValidationCode::Required, "a is required");
        errors.add("b", ValidationCode::TooLong, "b too long");
        let err = errors.into_result().unwrap_err();
        assert_eq!(err.len(), 2);
        assert_eq!(err.to_string(), "a is required; b too long");
    }
}
