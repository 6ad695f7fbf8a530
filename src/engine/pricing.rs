use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::limits::MAX_RENTAL_DAYS;

use super::validator::check_range;
use super::{EngineError, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Price {
    pub days: u32,
    pub daily_rate: Decimal,
    pub total: Decimal,
}

/// A rate is usable only when strictly positive.
pub fn check_rate(daily_rate: Decimal) -> Result<(), ValidationError> {
    if daily_rate <= Decimal::ZERO {
        return Err(ValidationError::InvalidRate(daily_rate));
    }
    Ok(())
}

/// Inclusive day count and total for a stay.
///
/// `days = (end - start) + 1`: pick-up and return day are both billed, so
/// `2024-01-10..2024-01-11` is two days. Totals are exact decimals.
pub fn price(start: NaiveDate, end: NaiveDate, daily_rate: Decimal) -> Result<Price, EngineError> {
    check_rate(daily_rate)?;
    let range = check_range(start, end)?;
    let days = range.days();
    if days > MAX_RENTAL_DAYS {
        return Err(EngineError::LimitExceeded("rental too long"));
    }
    Ok(Price {
        days: days as u32,
        daily_rate,
        total: Decimal::from(days) * daily_rate,
    })
}
