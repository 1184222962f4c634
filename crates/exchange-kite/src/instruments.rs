//! Instrument dump parsing and the per-expiry option chain index.

use crate::error::{KiteError, Result};
use crate::types::Instrument;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use straddle_core::OptionKind;

/// Parses the CSV body of `GET /instruments/{exchange}`.
///
/// # Errors
/// Returns error if a row cannot be decoded.
pub fn parse_dump(body: &str) -> Result<Vec<Instrument>> {
    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Call and put symbols listed at one strike.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrikeRow {
    pub call: Option<String>,
    pub put: Option<String>,
}

/// Options of one root and expiry, keyed by strike.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainIndex {
    pub root: String,
    pub expiry: NaiveDate,
    pub lot_size: u32,
    pub tick_size: Decimal,
    strikes: BTreeMap<Decimal, StrikeRow>,
}

impl ChainIndex {
    /// Builds the index for `root` options expiring on `expiry`.
    ///
    /// # Errors
    /// Returns error if the dump lists no such options.
    pub fn build(instruments: &[Instrument], root: &str, expiry: NaiveDate) -> Result<Self> {
        let expiry_str = expiry.format("%Y-%m-%d").to_string();
        let mut strikes: BTreeMap<Decimal, StrikeRow> = BTreeMap::new();
        let mut lot_size = 0;
        let mut tick_size = Decimal::ZERO;

        for inst in instruments
            .iter()
            .filter(|i| i.name == root && i.expiry == expiry_str)
        {
            let kind = match inst.instrument_type.as_str() {
                "CE" => OptionKind::Call,
                "PE" => OptionKind::Put,
                _ => continue,
            };
            let strike = Decimal::try_from(inst.strike)
                .map_err(|e| KiteError::Serialization(format!("strike {}: {e}", inst.strike)))?
                .normalize();
            let row = strikes.entry(strike).or_default();
            match kind {
                OptionKind::Call => row.call = Some(inst.tradingsymbol.clone()),
                OptionKind::Put => row.put = Some(inst.tradingsymbol.clone()),
            }
            lot_size = inst.lot_size;
            tick_size = Decimal::try_from(inst.tick_size).unwrap_or_default();
        }

        if strikes.is_empty() {
            return Err(KiteError::InvalidInput(format!(
                "no {root} options expiring {expiry_str} in instrument dump"
            )));
        }

        Ok(Self {
            root: root.to_string(),
            expiry,
            lot_size,
            tick_size,
            strikes,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }

    #[must_use]
    pub fn row(&self, strike: Decimal) -> Option<&StrikeRow> {
        self.strikes.get(&strike)
    }

    /// Tradingsymbols of the `width` strikes closest to `price`, both kinds,
    /// ordered by strike.
    #[must_use]
    pub fn symbols_near(&self, price: Decimal, width: usize) -> Vec<String> {
        let mut by_distance: Vec<(&Decimal, &StrikeRow)> = self.strikes.iter().collect();
        by_distance.sort_by_key(|(strike, _)| (**strike - price).abs());
        by_distance.truncate(width);
        by_distance.sort_by_key(|(strike, _)| **strike);

        by_distance
            .into_iter()
            .flat_map(|(_, row)| row.call.iter().chain(row.put.iter()).cloned())
            .collect()
    }
}
