//! Conversion between major-unit decimals and the internal minor-unit integers.
//!
//! Only the API edge calls into this module; everything past it deals in [`MinorUnits`].

use rust_decimal::{Decimal, prelude::ToPrimitive};
use thiserror::Error;

use crate::model::MinorUnits;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount {amount} has more than {exponent} fractional digits")]
    TooPrecise { amount: Decimal, exponent: u32 },
    #[error("Amount {0} is out of range")]
    OutOfRange(Decimal),
}

pub fn to_minor_units(amount: Decimal, exponent: u32) -> Result<MinorUnits, MoneyError> {
    let factor = 10_i64
        .checked_pow(exponent)
        .ok_or(MoneyError::OutOfRange(amount))?;
    let scaled = amount
        .checked_mul(Decimal::from(factor))
        .ok_or(MoneyError::OutOfRange(amount))?;
    if !scaled.fract().is_zero() {
        return Err(MoneyError::TooPrecise { amount, exponent });
    }
    scaled.to_i64().ok_or(MoneyError::OutOfRange(amount))
}

pub fn to_major_units(amount: MinorUnits, exponent: u32) -> Decimal {
    Decimal::new(amount, exponent)
}
