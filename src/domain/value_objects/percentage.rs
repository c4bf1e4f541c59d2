use crate::domain::errors::ValidationError;

/// Fraction in the open interval (0, 1), e.g. `0.08` for an 8% stoploss.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Percentage {
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        if value <= 0.0 || value >= 1.0 {
            return Err(ValidationError::InvalidPercentage(format!(
                "{} (must be in (0, 1))",
                value
            )));
        }
        Ok(Percentage(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Take-profit targets may exceed 100%, so only positivity is enforced.
pub fn validate_take_profit(value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::MustBeFinite);
    }
    if value <= 0.0 {
        return Err(ValidationError::InvalidPercentage(format!(
            "{} (take-profit must be positive)",
            value
        )));
    }
    Ok(value)
}

impl std::fmt::Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}%", self.0 * 100.0)
    }
}
