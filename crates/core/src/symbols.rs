//! Exchange option tradingsymbols: parsing, building, and expiry helpers.
//!
//! Symbols have the shape `<root><expiry-marker><strike><CE|PE>`, for
//! example `NIFTY23OCT19500CE` (monthly) or `NIFTY23O1919500CE` (weekly).

use crate::error::SymbolError;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    /// Two-letter exchange suffix.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Call => "CE",
            Self::Put => "PE",
        }
    }
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => f.write_str("CALL"),
            Self::Put => f.write_str("PUT"),
        }
    }
}

/// A parsed option tradingsymbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSymbol {
    pub symbol: String,
    pub strike: Decimal,
    pub kind: OptionKind,
}

impl OptionSymbol {
    /// Splits `symbol` on the last occurrence of `expiry_marker`; what follows
    /// is the strike and the CE/PE suffix.
    ///
    /// # Errors
    ///
    /// Fails if the marker or suffix is missing or the strike is not numeric.
    pub fn parse(symbol: &str, expiry_marker: &str) -> Result<Self, SymbolError> {
        let (_, tail) = symbol
            .rsplit_once(expiry_marker)
            .filter(|_| !expiry_marker.is_empty())
            .ok_or_else(|| SymbolError::MissingExpiryMarker {
                symbol: symbol.to_string(),
                marker: expiry_marker.to_string(),
            })?;

        let (strike, kind) = if let Some(strike) = tail.strip_suffix("CE") {
            (strike, OptionKind::Call)
        } else if let Some(strike) = tail.strip_suffix("PE") {
            (strike, OptionKind::Put)
        } else {
            return Err(SymbolError::MissingOptionSuffix(symbol.to_string()));
        };

        let strike = Decimal::from_str(strike).map_err(|_| SymbolError::InvalidStrike {
            symbol: symbol.to_string(),
            strike: strike.to_string(),
        })?;

        Ok(Self {
            symbol: symbol.to_string(),
            strike,
            kind,
        })
    }

    /// The symbol of the opposite option at the same strike and expiry.
    #[must_use]
    pub fn counterpart(&self, kind: OptionKind) -> String {
        let stem = &self.symbol[..self.symbol.len() - 2];
        format!("{stem}{}", kind.suffix())
    }
}

/// First Thursday on or after two days from `today`.
#[must_use]
pub fn next_weekly_expiry(today: NaiveDate) -> NaiveDate {
    let start = today + Duration::days(2);
    let ahead = (7 + Weekday::Thu.num_days_from_monday() - start.weekday().num_days_from_monday()) % 7;
    start + Duration::days(i64::from(ahead))
}

/// True when no later weekly expiry falls in the same month.
#[must_use]
pub fn is_monthly_expiry(expiry: NaiveDate) -> bool {
    (expiry + Duration::days(7)).month() != expiry.month()
}

/// Expiry marker embedded in tradingsymbols.
///
/// Monthly expiries use `YYMON` (`23OCT`). Weekly expiries use `YY`, a
/// single month character (`1`-`9`, `O`, `N`, `D`), and the two-digit day.
#[must_use]
pub fn expiry_marker(expiry: NaiveDate) -> String {
    if is_monthly_expiry(expiry) {
        return expiry.format("%y%b").to_string().to_uppercase();
    }
    let month = match expiry.month() {
        m @ 1..=9 => char::from(b'0' + m as u8),
        10 => 'O',
        11 => 'N',
        _ => 'D',
    };
    format!("{}{month}{:02}", expiry.format("%y"), expiry.day())
}

/// Builds the tradingsymbol for `root` at `strike`.
#[must_use]
pub fn option_symbol(root: &str, expiry: NaiveDate, strike: Decimal, kind: OptionKind) -> String {
    format!(
        "{root}{}{}{}",
        expiry_marker(expiry),
        strike.normalize(),
        kind.suffix()
    )
}

/// Rounds `price` to the nearest multiple of `step`, halves rounding up.
#[must_use]
pub fn round_to_strike(price: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return price;
    }
    ((price + step / Decimal::TWO) / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_monthly_call_and_put() {
        let call = OptionSymbol::parse("NIFTY23OCT19500CE", "23OCT").unwrap();
        assert_eq!(call.strike, dec!(19500));
        assert_eq!(call.kind, OptionKind::Call);

        let put = OptionSymbol::parse("BANKNIFTY23OCT44500PE", "23OCT").unwrap();
        assert_eq!(put.strike, dec!(44500));
        assert_eq!(put.kind, OptionKind::Put);
    }

    #[test]
    fn parses_on_last_marker_occurrence() {
        // Root and marker share characters; the strike follows the last match.
        let sym = OptionSymbol::parse("X23O19X23O1919500PE", "23O19").unwrap();
        assert_eq!(sym.strike, dec!(19500));
    }

    #[test]
    fn rejects_underlying_and_malformed_symbols() {
        assert!(matches!(
            OptionSymbol::parse("NIFTY 50", "23OCT"),
            Err(SymbolError::MissingExpiryMarker { .. })
        ));
        assert!(matches!(
            OptionSymbol::parse("NIFTY23OCTFUT", "23OCT"),
            Err(SymbolError::MissingOptionSuffix(_))
        ));
        assert!(matches!(
            OptionSymbol::parse("NIFTY23OCTABCCE", "23OCT"),
            Err(SymbolError::InvalidStrike { .. })
        ));
    }

    #[test]
    fn counterpart_swaps_suffix() {
        let call = OptionSymbol::parse("NIFTY23OCT19500CE", "23OCT").unwrap();
        assert_eq!(call.counterpart(OptionKind::Put), "NIFTY23OCT19500PE");
        assert_eq!(call.counterpart(OptionKind::Call), "NIFTY23OCT19500CE");
    }

    #[test]
    fn next_expiry_skips_to_thursday_two_days_out() {
        // Monday 2023-10-16 -> Wednesday start -> Thursday 19th.
        assert_eq!(next_weekly_expiry(date(2023, 10, 16)), date(2023, 10, 19));
        // Wednesday 18th -> Friday start -> Thursday 26th.
        assert_eq!(next_weekly_expiry(date(2023, 10, 18)), date(2023, 10, 26));
        // Tuesday 17th -> Thursday start -> same day.
        assert_eq!(next_weekly_expiry(date(2023, 10, 17)), date(2023, 10, 19));
    }

    #[test]
    fn expiry_markers_follow_weekly_and_monthly_formats() {
        assert_eq!(expiry_marker(date(2023, 10, 19)), "23O19");
        assert_eq!(expiry_marker(date(2023, 10, 26)), "23OCT");
        assert_eq!(expiry_marker(date(2023, 3, 9)), "2339");
        assert_eq!(expiry_marker(date(2023, 12, 7)), "23D07");
    }

    #[test]
    fn builds_symbols_that_parse_back() {
        let expiry = date(2023, 10, 26);
        let symbol = option_symbol("NIFTY", expiry, dec!(19500), OptionKind::Put);
        assert_eq!(symbol, "NIFTY23OCT19500PE");
        let parsed = OptionSymbol::parse(&symbol, &expiry_marker(expiry)).unwrap();
        assert_eq!(parsed.kind, OptionKind::Put);
    }

    #[test]
    fn rounds_to_nearest_strike() {
        assert_eq!(round_to_strike(dec!(19549.9), dec!(100)), dec!(19500));
        assert_eq!(round_to_strike(dec!(19550), dec!(100)), dec!(19600));
        assert_eq!(round_to_strike(dec!(44512), dec!(50)), dec!(44500));
    }
}
