//! Validation helpers for DTOs.

use rust_decimal::Decimal;
use validator::ValidationError;

use crate::services::code_registry::{CODE_LENGTH, is_valid_code};

/// Validates that a room code is exactly six ASCII digits.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("042917") // Ok
/// validate_room_code("42917")  // Err - too short
/// validate_room_code("04291a") // Err - not a digit
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != CODE_LENGTH {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {CODE_LENGTH} digits (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !is_valid_code(code) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must contain only digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a user identifier supplied by the auth layer is usable.
pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.trim().is_empty() || user_id.len() > 128 {
        let mut err = ValidationError::new("user_id");
        err.message = Some("User id must be between 1 and 128 characters".into());
        return Err(err);
    }
    Ok(())
}

/// Validates that an amount is strictly positive.
pub fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() || amount.is_zero() {
        let mut err = ValidationError::new("amount_positive");
        err.message = Some(format!("Amount must be positive (got {amount})").into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_room_code_valid() {
        assert!(validate_room_code("000000").is_ok());
        assert!(validate_room_code("042917").is_ok());
        assert!(validate_room_code("999999").is_ok());
    }

    #[test]
    fn test_validate_room_code_invalid_length() {
        assert!(validate_room_code("42917").is_err()); // too short
        assert!(validate_room_code("0429170").is_err()); // too long
        assert!(validate_room_code("").is_err());
    }

    #[test]
    fn test_validate_room_code_invalid_format() {
        assert!(validate_room_code("04291a").is_err());
        assert!(validate_room_code("04 917").is_err());
        assert!(validate_room_code("-42917").is_err());
    }

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id("user-1").is_ok());
        assert!(validate_user_id("   ").is_err());
        assert!(validate_user_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_positive_amount() {
        assert!(validate_positive_amount(&Decimal::ONE).is_ok());
        assert!(validate_positive_amount(&Decimal::ZERO).is_err());
        assert!(validate_positive_amount(&Decimal::NEGATIVE_ONE).is_err());
    }
}
