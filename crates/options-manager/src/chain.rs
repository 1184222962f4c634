//! Strike table built from a chain snapshot and straddle strike selection.

use rust_decimal::Decimal;
use straddle_core::{ChainSnapshot, OptionKind, OptionSymbol, SymbolError};

use crate::error::{EngineError, Result};

/// Every option in a snapshot, in snapshot order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTable {
    entries: Vec<OptionSymbol>,
}

impl TokenTable {
    /// Parses every quote except the underlying's.
    ///
    /// # Errors
    /// Fails on the first symbol that does not parse.
    pub fn from_snapshot(
        snapshot: &ChainSnapshot,
        underlying: &str,
        expiry_marker: &str,
    ) -> std::result::Result<Self, SymbolError> {
        let entries = snapshot
            .quotes
            .iter()
            .filter(|q| q.symbol != underlying)
            .map(|q| OptionSymbol::parse(&q.symbol, expiry_marker))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry at index 1 once entries are stably sorted by distance of
    /// strike from `spot`.
    ///
    /// In a full chain both kinds share each strike, so this is the second
    /// option at the nearest strike. A table with one kind per strike yields
    /// the next strike out, the earlier one in snapshot order winning ties.
    #[must_use]
    pub fn reference_entry(&self, spot: Decimal) -> Option<&OptionSymbol> {
        let mut sorted: Vec<&OptionSymbol> = self.entries.iter().collect();
        sorted.sort_by_key(|e| (e.strike - spot).abs());
        sorted.get(1).copied()
    }
}

/// Call and put chosen for entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StraddlePair {
    pub strike: Decimal,
    pub call: String,
    pub put: String,
    pub call_premium: Decimal,
    pub put_premium: Decimal,
}

impl StraddlePair {
    #[must_use]
    pub fn symbol(&self, kind: OptionKind) -> &str {
        match kind {
            OptionKind::Call => &self.call,
            OptionKind::Put => &self.put,
        }
    }

    #[must_use]
    pub const fn premium(&self, kind: OptionKind) -> Decimal {
        match kind {
            OptionKind::Call => self.call_premium,
            OptionKind::Put => self.put_premium,
        }
    }
}

/// Finds the call and put at the reference strike and their quotes.
///
/// # Errors
/// Fails if the underlying, the reference entry, or either option is absent.
pub fn select_straddle(
    table: &TokenTable,
    snapshot: &ChainSnapshot,
    underlying: &str,
) -> Result<StraddlePair> {
    let spot = snapshot
        .last_price(underlying)
        .ok_or_else(|| EngineError::MissingInstrument(underlying.to_string()))?;
    let reference = table
        .reference_entry(spot)
        .ok_or_else(|| EngineError::MissingInstrument(format!("option near {spot}")))?;

    let call = reference.counterpart(OptionKind::Call);
    let put = reference.counterpart(OptionKind::Put);
    let quote = |symbol: &str| {
        snapshot
            .last_price(symbol)
            .ok_or_else(|| EngineError::MissingInstrument(symbol.to_string()))
    };

    Ok(StraddlePair {
        strike: reference.strike,
        call_premium: quote(&call)?,
        put_premium: quote(&put)?,
        call,
        put,
    })
}
