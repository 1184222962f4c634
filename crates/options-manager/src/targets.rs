//! Profit target pricing.

use rust_decimal::Decimal;

use crate::stops::floor_to_tick;
use crate::types::PricingRules;

/// Trigger for a target `target_pct` below `premium`, floored to a tick.
#[must_use]
pub fn target_price(premium: Decimal, rules: &PricingRules) -> Decimal {
    floor_to_tick(
        premium * (Decimal::ONE - rules.target_pct / Decimal::ONE_HUNDRED),
        rules.tick_size,
    )
}

/// Limit price for a protective buy triggered at `trigger`.
#[must_use]
pub fn limit_price(trigger: Decimal, rules: &PricingRules) -> Decimal {
    trigger + rules.limit_offset
}
