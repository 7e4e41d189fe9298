//! Percentage change between two observations.

use crate::core::rate::RateObservation;
use rust_decimal::{Decimal, RoundingStrategy};

/// Percent change from `past` to `current`, rounded half away from zero to 2 places.
///
/// Returns zero ("no signal") when either side is missing or the baseline is zero.
pub fn percent_change(current: Option<&RateObservation>, past: Option<&RateObservation>) -> Decimal {
    let (Some(current), Some(past)) = (current, past) else {
        return Decimal::ZERO;
    };
    if past.value.is_zero() {
        return Decimal::ZERO;
    }

    let change = (current.value - past.value) / past.value * Decimal::ONE_HUNDRED;
    change.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// True when the absolute change reaches the threshold.
pub fn should_notify(change: Decimal, threshold_percent: Decimal) -> bool {
    change.abs() >= threshold_percent
}
