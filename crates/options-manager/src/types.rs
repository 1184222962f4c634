//! Types for straddle session management.

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use straddle_core::symbols::expiry_marker;
use straddle_core::{OptionKind, StrategyConfig};

/// One side of the straddle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    #[serde(rename = "CE")]
    Ce,
    #[serde(rename = "PE")]
    Pe,
}

impl Leg {
    pub const ALL: [Self; 2] = [Self::Ce, Self::Pe];

    #[must_use]
    pub const fn kind(self) -> OptionKind {
        match self {
            Self::Ce => OptionKind::Call,
            Self::Pe => OptionKind::Put,
        }
    }

    #[must_use]
    pub const fn sibling(self) -> Self {
        match self {
            Self::Ce => Self::Pe,
            Self::Pe => Self::Ce,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ce => "CE",
            Self::Pe => "PE",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Ce => 0,
            Self::Pe => 1,
        }
    }
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegPhase {
    NotEntered,
    /// Sold, with a live stop-loss (and target, when enabled).
    Protected,
    StopHit,
    TargetHit,
    /// Squared off by the session exit.
    Exited,
}

impl LegPhase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::StopHit | Self::TargetHit | Self::Exited)
    }
}

impl std::fmt::Display for LegPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotEntered => write!(f, "not_entered"),
            Self::Protected => write!(f, "entered_protected"),
            Self::StopHit => write!(f, "stop_hit"),
            Self::TargetHit => write!(f, "target_hit"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Which order of a leg a cache key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRole {
    Entry,
    StopLoss,
    Target,
}

impl OrderRole {
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Entry => "SELL",
            Self::StopLoss => "SL",
            Self::Target => "TGT",
        }
    }
}

/// Percentages and tick rules for protective orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRules {
    /// Stop sits this far above the premium (e.g., 10 = +10%).
    pub stop_loss_pct: Decimal,
    /// Premium must fall this far below the stop's base before trailing.
    pub trailing_trigger_pct: Decimal,
    /// Target sits this far below the premium.
    pub target_pct: Decimal,
    pub tick_size: Decimal,
    /// Added to a trigger to form the limit price.
    pub limit_offset: Decimal,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            stop_loss_pct: Decimal::from(10),
            trailing_trigger_pct: Decimal::from(10),
            target_pct: Decimal::from(50),
            tick_size: Decimal::new(5, 2),
            limit_offset: Decimal::TWO,
        }
    }
}

/// Entry and exit times, exchange-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub entry: NaiveTime,
    pub exit: NaiveTime,
}

/// Engine configuration for one trading session.
#[derive(Debug, Clone)]
pub struct StraddleConfig {
    /// Namespace for every cache key this session writes.
    pub name: String,
    /// Underlying's symbol in chain snapshots.
    pub underlying_symbol: String,
    /// Expiry marker used to split tradingsymbols.
    pub expiry_marker: String,
    pub lots: u32,
    pub lot_size: u32,
    pub window: SessionWindow,
    pub rules: PricingRules,
    pub add_targets: bool,
    /// Lifetime of cached order ids.
    pub order_ttl: Duration,
}

impl StraddleConfig {
    #[must_use]
    pub fn from_settings(strategy: &StrategyConfig, expiry: NaiveDate, order_ttl: Duration) -> Self {
        Self {
            name: strategy.name.clone(),
            underlying_symbol: strategy.instrument_symbol.clone(),
            expiry_marker: expiry_marker(expiry),
            lots: strategy.lots,
            lot_size: strategy.lot_size,
            window: SessionWindow {
                entry: strategy.entry_time,
                exit: strategy.exit_time,
            },
            rules: PricingRules {
                stop_loss_pct: strategy.stop_loss_pct,
                trailing_trigger_pct: strategy.trailing_trigger_pct,
                target_pct: strategy.target_pct,
                tick_size: strategy.tick_size,
                limit_offset: strategy.limit_offset,
            },
            add_targets: strategy.add_targets,
            order_ttl,
        }
    }

    /// Contracts per leg.
    #[must_use]
    pub const fn quantity(&self) -> u32 {
        self.lots.saturating_mul(self.lot_size)
    }

    #[must_use]
    pub fn cache_key(&self, role: OrderRole, leg: Leg) -> String {
        format!("{}:{}_{}", self.name, role.prefix(), leg)
    }
}

/// What a tick should do, decided from time and leg phases alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Wait,
    Exit(ExitReason),
    Enter,
    Manage,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    ExitTime,
    BothLegsClosed,
    /// The snapshot source ran dry; open legs keep their stops.
    FeedClosed,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExitTime => write!(f, "exit_time"),
            Self::BothLegsClosed => write!(f, "both_legs_closed"),
            Self::FeedClosed => write!(f, "feed_closed"),
        }
    }
}

/// End-of-session view of one leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegSummary {
    pub leg: Leg,
    pub tradingsymbol: Option<String>,
    pub phase: LegPhase,
    /// Entry premium minus exit premium, per contract.
    pub realized: Option<Decimal>,
}

/// Returned by the session loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub exit_reason: ExitReason,
    pub legs: Vec<LegSummary>,
    pub profit: Decimal,
}
