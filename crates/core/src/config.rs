use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub kite: KiteConfig,
    pub strategy: StrategyConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KiteConfig {
    pub api_key: String,
    pub api_secret: String,
    /// Skips the interactive login when set.
    pub access_token: Option<String>,
    pub base_url: String,
    pub login_url: String,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for KiteConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            access_token: None,
            base_url: "https://api.kite.trade".to_string(),
            login_url: "https://kite.zerodha.com/connect/login".to_string(),
            requests_per_second: 8,
            timeout_secs: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Namespace for cache keys; one live session per name.
    pub name: String,
    /// Name of the underlying as it appears in chain snapshots.
    pub instrument_symbol: String,
    /// Exchange quote key for the underlying.
    pub underlying_quote: String,
    /// Option root used in tradingsymbols (e.g. `NIFTY`).
    pub option_root: String,
    /// Defaults to the next weekly expiry.
    pub expiry: Option<NaiveDate>,
    pub entry_time: NaiveTime,
    pub exit_time: NaiveTime,
    pub lots: u32,
    /// Contract lot size; replaced by the instrument dump when available.
    pub lot_size: u32,
    pub stop_loss_pct: Decimal,
    pub trailing_trigger_pct: Decimal,
    pub target_pct: Decimal,
    pub add_targets: bool,
    pub tick_size: Decimal,
    /// Added to stop and target triggers to form the limit price.
    pub limit_offset: Decimal,
    pub poll_interval_ms: u64,
    /// Strikes polled either side of the underlying.
    pub strike_window: usize,
    pub timezone: String,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "straddle".to_string(),
            instrument_symbol: "NIFTY 50".to_string(),
            underlying_quote: "NSE:NIFTY 50".to_string(),
            option_root: "NIFTY".to_string(),
            expiry: None,
            entry_time: NaiveTime::from_hms_opt(9, 20, 0).unwrap_or_default(),
            exit_time: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or_default(),
            lots: 1,
            lot_size: 50,
            stop_loss_pct: Decimal::from(10),
            trailing_trigger_pct: Decimal::from(10),
            target_pct: Decimal::from(50),
            add_targets: false,
            tick_size: Decimal::new(5, 2),
            limit_offset: Decimal::TWO,
            poll_interval_ms: 1000,
            strike_window: 10,
            timezone: "Asia/Kolkata".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: String,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: "state/straddle-cache.json".to_string(),
            ttl_secs: 43_200,
        }
    }
}
