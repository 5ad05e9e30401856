use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

use super::error::ApiError;

/// Converts an amount into the gateway's minor currency unit (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ApiError> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|cents| cents.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| ApiError::BadRequest(format!("Amount {} is out of range", amount)))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Validates a user-supplied amount and normalizes it to two decimal places.
pub fn positive_amount(amount: Decimal) -> Result<Decimal, ApiError> {
    let amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if amount <= Decimal::ZERO {
        return Err(ApiError::BadRequest(
            "Amount must be greater than zero".to_string(),
        ));
    }
    Ok(amount)
}
