//! Session loop: pulls chain snapshots and drives the engine one tick at a time.

use chrono::NaiveDateTime;
use straddle_core::{ChainFeed, Clock};
use tracing::{error, info, warn};

use crate::engine::StraddleEngine;
use crate::error::{EngineError, Result};
use crate::types::{ExitReason, LegPhase, SessionReport, SessionWindow, TickAction};

/// What a tick at `now` should do, given the two leg phases.
///
/// 1. Before the entry time: wait.
/// 2. At or after the exit time, or once both legs are closed: exit.
/// 3. Nothing entered yet: enter.
/// 4. Otherwise trail stops and watch for fills.
#[must_use]
pub fn decide(now: NaiveDateTime, window: &SessionWindow, phases: [LegPhase; 2]) -> TickAction {
    let time = now.time();
    if time < window.entry {
        return TickAction::Wait;
    }
    if time >= window.exit {
        return TickAction::Exit(ExitReason::ExitTime);
    }
    if phases.iter().all(|p| p.is_terminal()) {
        return TickAction::Exit(ExitReason::BothLegsClosed);
    }
    if phases.iter().all(|p| *p == LegPhase::NotEntered) {
        return TickAction::Enter;
    }
    TickAction::Manage
}

/// Runs the session until it exits or the feed closes.
///
/// Transient feed errors are logged and the next snapshot is awaited. A
/// closed feed ends the session without squaring off; open legs keep their
/// stops at the broker.
///
/// # Errors
/// Returns fatal feed errors and whatever the engine treats as fatal.
pub async fn execute<F>(
    engine: &mut StraddleEngine,
    feed: &mut F,
    clock: &dyn Clock,
) -> Result<SessionReport>
where
    F: ChainFeed + ?Sized,
{
    let config = engine.config();
    info!(
        name = %config.name,
        entry = %config.window.entry,
        exit = %config.window.exit,
        lots = config.lots,
        lot_size = config.lot_size,
        stop_loss_pct = %config.rules.stop_loss_pct,
        trailing_trigger_pct = %config.rules.trailing_trigger_pct,
        add_targets = config.add_targets,
        "Straddle session started"
    );

    loop {
        let snapshot = match feed.next_snapshot().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                warn!("Chain feed closed before the session ended");
                return Ok(engine.report(ExitReason::FeedClosed));
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Skipping tick");
                continue;
            }
            Err(e) => {
                error!(error = %e, "Chain feed failed");
                return Err(EngineError::Feed(e));
            }
        };

        if let Some(reason) = engine.on_tick(&snapshot, clock.now()).await? {
            let report = engine.report(reason);
            info!(%reason, profit = %report.profit, "Straddle session finished");
            return Ok(report);
        }
    }
}
