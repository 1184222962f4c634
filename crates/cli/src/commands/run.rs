//! One live (or paper) straddle session.
//!
//! Wiring, in order:
//! 1. Layer CLI overrides over the figment config.
//! 2. Open the order cache so a restart finds the orders it already placed.
//! 3. Download the NFO instrument dump and index the chain for the expiry.
//! 4. Recover state, then hand the engine to the session loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use clap::Args;
use rust_decimal::Decimal;
use straddle_core::symbols::next_weekly_expiry;
use straddle_core::{
    AppConfig, ChainFeed, Clock, ConfigLoader, FileCache, KeyValueCache, OrderGateway,
    SystemClock,
};
use straddle_kite::{
    ChainIndex, KiteClient, KiteCredentials, PaperFeed, PaperGateway, QuoteChainFeed,
    QuoteFeedConfig,
};
use straddle_options_manager::{execute, SessionReport, StraddleConfig, StraddleEngine};

const OPTION_EXCHANGE: &str = "NFO";

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file path.
    #[arg(short, long, default_value = "config/Straddle.toml")]
    pub config: String,

    /// Entry time, HH:MM exchange time.
    #[arg(long, value_parser = parse_clock_time)]
    pub entry_time: Option<NaiveTime>,

    /// Exit time, HH:MM exchange time.
    #[arg(long, value_parser = parse_clock_time)]
    pub exit_time: Option<NaiveTime>,

    /// Lots per leg.
    #[arg(long)]
    pub lots: Option<u32>,

    /// Option root, e.g. NIFTY or BANKNIFTY.
    #[arg(long)]
    pub symbol: Option<String>,

    /// Expiry date, YYYY-MM-DD. Defaults to the next weekly expiry.
    #[arg(long)]
    pub expiry: Option<NaiveDate>,

    /// Kite access token from `straddle login`.
    #[arg(long, env = "KITE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Place a bracket target on each leg.
    #[arg(long)]
    pub targets: bool,

    /// Simulate fills locally against live quotes.
    #[arg(long)]
    pub paper: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<String>,
}

impl RunArgs {
    /// Copies command-line overrides onto the loaded config.
    fn apply(&self, config: &mut AppConfig) {
        let strategy = &mut config.strategy;
        if let Some(entry) = self.entry_time {
            strategy.entry_time = entry;
        }
        if let Some(exit) = self.exit_time {
            strategy.exit_time = exit;
        }
        if let Some(lots) = self.lots {
            strategy.lots = lots;
        }
        if let Some(root) = &self.symbol {
            strategy.option_root = root.to_uppercase();
        }
        if self.expiry.is_some() {
            strategy.expiry = self.expiry;
        }
        if self.targets {
            strategy.add_targets = true;
        }
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            config.kite.access_token = Some(token.to_string());
        }
    }
}

fn parse_clock_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| format!("expected HH:MM, got {value:?}"))
}

/// Checks settings that would otherwise only fail mid-session.
fn validate(config: &AppConfig) -> Result<()> {
    let strategy = &config.strategy;
    if strategy.entry_time >= strategy.exit_time {
        bail!(
            "entry time {} must be before exit time {}",
            strategy.entry_time,
            strategy.exit_time
        );
    }
    if strategy.lots == 0 {
        bail!("lots must be at least 1");
    }
    if strategy.stop_loss_pct <= Decimal::ZERO {
        bail!("stop_loss_pct must be positive");
    }
    if strategy.add_targets
        && (strategy.target_pct <= Decimal::ZERO || strategy.target_pct >= Decimal::ONE_HUNDRED)
    {
        bail!("target_pct must be between 0 and 100");
    }
    Ok(())
}

/// Runs a session to completion and prints the report.
pub async fn run_session(args: RunArgs) -> Result<()> {
    let mut config = ConfigLoader::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;
    args.apply(&mut config);
    validate(&config)?;

    let tz: Tz = config
        .strategy
        .timezone
        .parse()
        .map_err(|e| anyhow!("invalid timezone {:?}: {e}", config.strategy.timezone))?;
    let clock = SystemClock::new(tz);
    let expiry = config
        .strategy
        .expiry
        .unwrap_or_else(|| next_weekly_expiry(clock.now().date()));

    let credentials = KiteCredentials::from_config(&config.kite);
    if !credentials.has_access_token() {
        bail!("no Kite access token; run `straddle login` first");
    }
    let client = Arc::new(KiteClient::new(&config.kite, credentials)?);

    tracing::info!(exchange = OPTION_EXCHANGE, "Downloading instrument dump");
    let instruments = client.instruments(OPTION_EXCHANGE).await?;
    let index = ChainIndex::build(&instruments, &config.strategy.option_root, expiry)?;
    tracing::info!(
        root = %index.root,
        %expiry,
        strikes = index.len(),
        lot_size = index.lot_size,
        "Option chain indexed"
    );
    config.strategy.lot_size = index.lot_size;
    if index.tick_size > Decimal::ZERO {
        config.strategy.tick_size = index.tick_size;
    }

    let cache: Arc<dyn KeyValueCache> = Arc::new(FileCache::open(&config.cache.path).await?);
    let feed_config = QuoteFeedConfig {
        underlying_quote: config.strategy.underlying_quote.clone(),
        underlying_symbol: config.strategy.instrument_symbol.clone(),
        option_exchange: OPTION_EXCHANGE.to_string(),
        strike_window: config.strategy.strike_window,
        poll_interval: Duration::from_millis(config.strategy.poll_interval_ms),
    };
    let live_feed = QuoteChainFeed::new(Arc::clone(&client), index, feed_config);

    let gateway: Arc<dyn OrderGateway>;
    let mut feed: Box<dyn ChainFeed>;
    if args.paper {
        tracing::warn!("Paper mode: orders are simulated locally");
        let paper = Arc::new(PaperGateway::new());
        feed = Box::new(PaperFeed::new(live_feed, Arc::clone(&paper)));
        gateway = paper;
    } else {
        feed = Box::new(live_feed);
        gateway = client;
    }

    let straddle = StraddleConfig::from_settings(
        &config.strategy,
        expiry,
        Duration::from_secs(config.cache.ttl_secs),
    );
    let mut engine = StraddleEngine::bootstrap(straddle, gateway, cache).await?;
    let report = execute(&mut engine, feed.as_mut(), &clock).await?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &SessionReport) {
    println!();
    println!("Session ended: {}", report.exit_reason);
    for leg in &report.legs {
        let realized = leg
            .realized
            .map_or_else(|| "-".to_string(), |r| r.round_dp(2).to_string());
        println!(
            "  {:<3} {:<24} {:<12} {:>10}",
            leg.leg.to_string(),
            leg.tradingsymbol.as_deref().unwrap_or("-"),
            leg.phase.to_string(),
            realized
        );
    }
    println!("Profit: {}", report.profit.round_dp(2));
}
