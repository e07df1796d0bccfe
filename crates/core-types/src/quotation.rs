use crate::error::CoreError;
use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// Number of nano units in one whole unit.
pub const NANO_PER_UNIT: i64 = 1_000_000_000;

const MAX_NANO: i32 = 999_999_999;
const FRACTION_DIGITS: u32 = 9;

/// An exact decimal price carried the way the brokerage API carries it:
/// whole `units` plus a `nano` fraction (10^-9), both with the same sign.
///
/// All price math is done on this pair (or on `Decimal`, which represents
/// it exactly). Floats only appear at explicit display boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quotation {
    units: i64,
    nano: i32,
}

impl Quotation {
    pub const ZERO: Quotation = Quotation { units: 0, nano: 0 };

    /// Builds a quotation, rejecting a `nano` outside the valid range or with
    /// a sign different from `units`.
    pub fn new(units: i64, nano: i32) -> Result<Self, CoreError> {
        if !(-MAX_NANO..=MAX_NANO).contains(&nano) {
            return Err(CoreError::NanoOutOfRange(nano));
        }
        if (units > 0 && nano < 0) || (units < 0 && nano > 0) {
            return Err(CoreError::SignMismatch { units, nano });
        }
        Ok(Self { units, nano })
    }

    /// Whole units only.
    pub fn from_units(units: i64) -> Self {
        Self { units, nano: 0 }
    }

    pub fn units(&self) -> i64 {
        self.units
    }

    pub fn nano(&self) -> i32 {
        self.nano
    }

    pub fn is_zero(&self) -> bool {
        self.units == 0 && self.nano == 0
    }

    pub fn is_positive(&self) -> bool {
        self.units > 0 || self.nano > 0
    }

    fn total_nanos(&self) -> i128 {
        self.units as i128 * NANO_PER_UNIT as i128 + self.nano as i128
    }

    fn from_total_nanos(total: i128) -> Result<Self, CoreError> {
        let units = i64::try_from(total / NANO_PER_UNIT as i128)
            .map_err(|_| CoreError::Overflow(total.to_string()))?;
        // Truncating division keeps the remainder's sign equal to the quotient's.
        let nano = (total % NANO_PER_UNIT as i128) as i32;
        Ok(Self { units, nano })
    }

    /// The exact decimal value of this quotation.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from_i128_with_scale(self.total_nanos(), FRACTION_DIGITS).normalize()
    }

    /// Snaps `value` to the nearest multiple of `step`, ties away from zero.
    ///
    /// With `step = 10^-9` this is the exact inverse of [`Quotation::to_decimal`].
    pub fn from_decimal(value: Decimal, step: Decimal) -> Result<Self, CoreError> {
        let snapped = rounded_ticks(value, step)?
            .checked_mul(step)
            .ok_or_else(|| CoreError::Overflow(value.to_string()))?;
        Self::from_exact_decimal(snapped)
    }

    fn from_exact_decimal(value: Decimal) -> Result<Self, CoreError> {
        let scaled = value
            .checked_mul(Decimal::from(NANO_PER_UNIT))
            .ok_or_else(|| CoreError::Overflow(value.to_string()))?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        let total = scaled
            .to_i128()
            .ok_or_else(|| CoreError::Overflow(value.to_string()))?;
        Self::from_total_nanos(total)
    }

    /// Snaps this price to an instrument's minimum price increment.
    ///
    /// Idempotent: quantizing an already aligned price returns it unchanged.
    pub fn quantize(&self, step: Quotation) -> Result<Self, CoreError> {
        Self::from_decimal(self.to_decimal(), step.to_decimal())
    }

    /// Float boundary conversion, rounded half-to-even at 9 fractional digits.
    pub fn from_f64(value: f64) -> Result<Self, CoreError> {
        let decimal = Decimal::from_f64_retain(value)
            .ok_or_else(|| CoreError::Overflow(value.to_string()))?
            .round_dp_with_strategy(FRACTION_DIGITS, RoundingStrategy::MidpointNearestEven);
        Self::from_exact_decimal(decimal)
    }

    pub fn to_f64(&self) -> f64 {
        self.to_decimal().to_f64().unwrap_or(0.0)
    }

    pub fn checked_add(self, rhs: Quotation) -> Option<Quotation> {
        Self::from_total_nanos(self.total_nanos() + rhs.total_nanos()).ok()
    }

    pub fn checked_sub(self, rhs: Quotation) -> Option<Quotation> {
        Self::from_total_nanos(self.total_nanos() - rhs.total_nanos()).ok()
    }

    /// Exact multiplication by an integer count (lots, pieces).
    pub fn checked_mul_int(self, factor: i64) -> Option<Quotation> {
        self.total_nanos()
            .checked_mul(factor as i128)
            .and_then(|total| Self::from_total_nanos(total).ok())
    }
}

/// `round(value / step)` with ties away from zero. The only division defined
/// on prices.
pub fn tick_count(value: Decimal, step: Decimal) -> Result<i64, CoreError> {
    rounded_ticks(value, step)?
        .to_i64()
        .ok_or_else(|| CoreError::Overflow(value.to_string()))
}

/// The tick count as an integral decimal, wide enough for any price at a
/// one-nano step.
fn rounded_ticks(value: Decimal, step: Decimal) -> Result<Decimal, CoreError> {
    if step <= Decimal::ZERO {
        return Err(CoreError::InvalidStep(step.to_string()));
    }
    Ok(value
        .checked_div(step)
        .ok_or_else(|| CoreError::Overflow(value.to_string()))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
}

impl Add for Quotation {
    type Output = Quotation;

    /// Saturates at the representable range instead of wrapping.
    fn add(self, rhs: Quotation) -> Quotation {
        self.checked_add(rhs).unwrap_or_else(|| saturate(self.total_nanos() + rhs.total_nanos()))
    }
}

impl Sub for Quotation {
    type Output = Quotation;

    fn sub(self, rhs: Quotation) -> Quotation {
        self.checked_sub(rhs).unwrap_or_else(|| saturate(self.total_nanos() - rhs.total_nanos()))
    }
}

impl Neg for Quotation {
    type Output = Quotation;

    fn neg(self) -> Quotation {
        Quotation { units: self.units.saturating_neg(), nano: -self.nano }
    }
}

fn saturate(total: i128) -> Quotation {
    if total < 0 {
        Quotation { units: i64::MIN, nano: -MAX_NANO }
    } else {
        Quotation { units: i64::MAX, nano: MAX_NANO }
    }
}

impl TryFrom<Decimal> for Quotation {
    type Error = CoreError;

    /// Exact conversion; values with more than 9 fractional digits are
    /// rounded half-to-even.
    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::from_exact_decimal(value)
    }
}

impl From<Quotation> for Decimal {
    fn from(value: Quotation) -> Self {
        value.to_decimal()
    }
}

impl fmt::Display for Quotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// A currency amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyValue {
    pub currency: String,
    pub amount: Quotation,
}
