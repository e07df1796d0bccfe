use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Percentile `p` (0..=100) of ascending `sorted` values, interpolating
/// linearly between the two closest ranks.
pub fn percentile(sorted: &[Decimal], p: Decimal) -> Option<Decimal> {
    let last = sorted.len().checked_sub(1)?;
    let p = p.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
    let rank = p / Decimal::ONE_HUNDRED * Decimal::from(last);
    let lower = rank.floor().to_usize()?.min(last);
    let upper = (lower + 1).min(last);
    let fraction = rank - Decimal::from(lower);
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<Decimal>() / Decimal::from(values.len()))
}
