use crate::domain::errors::ValidationError;

/// Normalize a ticker to the stored form: trimmed, upper-case, alphanumeric.
pub fn normalize_symbol(raw: &str) -> Result<String, ValidationError> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ValidationError::InvalidSymbol("symbol cannot be empty".to_string()));
    }
    if symbol.len() > 16 || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidSymbol(raw.to_string()));
    }
    Ok(symbol)
}
