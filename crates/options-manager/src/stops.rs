//! Stop-loss pricing and trailing rules.

use rust_decimal::Decimal;

use crate::types::PricingRules;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Rounds `price` down to a whole number of ticks.
#[must_use]
pub fn floor_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).floor() * tick
}

/// Trigger for a stop `stop_loss_pct` above `premium`, floored to a tick.
#[must_use]
pub fn stop_loss_price(premium: Decimal, rules: &PricingRules) -> Decimal {
    floor_to_tick(
        premium * (Decimal::ONE + rules.stop_loss_pct / HUNDRED),
        rules.tick_size,
    )
}

/// Premium at or below which a stop at `stop` is trailed down.
///
/// This is the premium the stop was derived from, less the trailing trigger.
#[must_use]
pub fn trailing_threshold(stop: Decimal, rules: &PricingRules) -> Decimal {
    stop * (Decimal::ONE - rules.trailing_trigger_pct / HUNDRED)
        / (Decimal::ONE + rules.stop_loss_pct / HUNDRED)
}

/// New stop for a leg trading at `premium`, if the stop should move.
///
/// Only ever returns a stop below `current_stop`.
#[must_use]
pub fn trailed_stop(current_stop: Decimal, premium: Decimal, rules: &PricingRules) -> Option<Decimal> {
    if premium > trailing_threshold(current_stop, rules) {
        return None;
    }
    let next = stop_loss_price(premium, rules);
    (next < current_stop).then_some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rules() -> PricingRules {
        PricingRules::default()
    }

    #[test]
    fn stop_floors_to_tick() {
        // 52.3 * 1.1 = 57.53
        let stop = stop_loss_price(dec!(52.3), &rules());
        assert_eq!(stop, dec!(57.50));
        assert_eq!(stop + rules().limit_offset, dec!(59.50));
    }

    #[test]
    fn exact_ticks_are_kept() {
        assert_eq!(floor_to_tick(dec!(57.55), dec!(0.05)), dec!(57.55));
        assert_eq!(floor_to_tick(dec!(57.549), dec!(0.05)), dec!(57.50));
        assert_eq!(floor_to_tick(dec!(3.3), dec!(0)), dec!(3.3));
    }

    #[test]
    fn threshold_is_ten_percent_below_base_premium() {
        // 57.5 / 1.1 * 0.9
        let threshold = trailing_threshold(dec!(57.5), &rules());
        assert!(threshold > dec!(47.04) && threshold < dec!(47.05));
    }

    #[test]
    fn no_trail_above_threshold() {
        assert_eq!(trailed_stop(dec!(57.5), dec!(47.1), &rules()), None);
    }

    #[test]
    fn trails_at_threshold() {
        // 47 * 1.1 = 51.7
        assert_eq!(trailed_stop(dec!(57.5), dec!(47), &rules()), Some(dec!(51.70)));
    }

    #[test]
    fn trailing_never_widens() {
        let mut stop = dec!(57.5);
        let mut history = vec![stop];
        for premium in [dec!(50), dec!(46), dec!(49), dec!(41), dec!(45), dec!(36.9), dec!(60)] {
            if let Some(next) = trailed_stop(stop, premium, &rules()) {
                stop = next;
            }
            history.push(stop);
        }
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
        assert!(stop < dec!(57.5));
    }
}
