use crate::domain::errors::ValidationError;

/// Profit and Loss value object
///
/// Unlike Price, PnL can be negative to represent losses.
/// This type ensures PnL values are finite but allows negative values.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PnL(f64);

impl PnL {
    /// Create a new PnL value
    ///
    /// # Errors
    /// Returns ValidationError::MustBeFinite if the value is NaN or infinite
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        Ok(PnL(value))
    }

    /// Unrealized P&L of `quantity` shares bought at `avg_cost` and now priced at `price`.
    pub fn unrealized(price: f64, avg_cost: f64, quantity: f64) -> Result<Self, ValidationError> {
        PnL::new((price - avg_cost) * quantity)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for PnL {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 >= 0.0 {
            write!(f, "+{:.2}", self.0)
        } else {
            write!(f, "-{:.2}", self.0.abs())
        }
    }
}
