//! Short-straddle state machine.
//!
//! Each leg moves `NotEntered -> Protected -> StopHit | TargetHit | Exited`.
//! The engine sells both legs once the entry time has passed, trails their
//! stops down as premiums decay, reacts to stop and target fills, and squares
//! everything off at the exit time or once both legs are closed.
//!
//! Order ids are written to the cache as they are created so a restarted
//! process picks the session up through [`StraddleEngine::bootstrap`] instead
//! of entering again.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::sync::Arc;
use straddle_core::{
    BrokerError, ChainSnapshot, KeyValueCache, OrderGateway, OrderId, OrderStatus, OrderType,
    Side,
};
use tracing::{debug, error, info, warn};

use crate::chain::{select_straddle, TokenTable};
use crate::error::{EngineError, Result};
use crate::order::OrderHandle;
use crate::position::{OrderContext, Position};
use crate::service::decide;
use crate::stops::{stop_loss_price, trailed_stop};
use crate::targets::{limit_price, target_price};
use crate::types::{
    ExitReason, Leg, LegPhase, LegSummary, OrderRole, SessionReport, StraddleConfig, TickAction,
};

const TARGET_TAG: &str = "target";
const EXIT_TAG: &str = "exit";

/// Orders and prices of one leg.
#[derive(Debug, Clone)]
pub struct LegState {
    pub tradingsymbol: Option<String>,
    pub phase: LegPhase,
    pub entry: Option<OrderHandle>,
    pub stop: Option<OrderHandle>,
    pub target: Option<OrderHandle>,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    /// Entry premium minus exit premium once the leg is closed.
    pub realized: Option<Decimal>,
}

impl LegState {
    const fn new() -> Self {
        Self {
            tradingsymbol: None,
            phase: LegPhase::NotEntered,
            entry: None,
            stop: None,
            target: None,
            stop_price: Decimal::ZERO,
            target_price: Decimal::ZERO,
            realized: None,
        }
    }
}

pub struct StraddleEngine {
    config: StraddleConfig,
    context: OrderContext,
    legs: [LegState; 2],
    token_table: Option<TokenTable>,
    exited: Option<ExitReason>,
}

impl std::fmt::Debug for StraddleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StraddleEngine")
            .field("config", &self.config)
            .field("legs", &self.legs)
            .field("exited", &self.exited)
            .finish_non_exhaustive()
    }
}

impl StraddleEngine {
    /// A fresh engine with nothing entered. Prefer [`bootstrap`](Self::bootstrap)
    /// for live sessions.
    pub fn new(
        config: StraddleConfig,
        gateway: Arc<dyn OrderGateway>,
        cache: Arc<dyn KeyValueCache>,
    ) -> Self {
        let context = OrderContext {
            gateway,
            cache,
            namespace: config.name.clone(),
            ttl: config.order_ttl,
        };
        Self {
            config,
            context,
            legs: [LegState::new(), LegState::new()],
            token_table: None,
            exited: None,
        }
    }

    /// Builds an engine and resumes any legs recorded in the cache.
    ///
    /// # Errors
    /// Fails if the cache cannot be read or a cached order cannot be fetched.
    pub async fn bootstrap(
        config: StraddleConfig,
        gateway: Arc<dyn OrderGateway>,
        cache: Arc<dyn KeyValueCache>,
    ) -> Result<Self> {
        let mut engine = Self::new(config, gateway, cache);
        engine.recover().await?;
        Ok(engine)
    }

    #[must_use]
    pub const fn config(&self) -> &StraddleConfig {
        &self.config
    }

    #[must_use]
    pub const fn leg(&self, leg: Leg) -> &LegState {
        &self.legs[leg.index()]
    }

    #[must_use]
    pub const fn phases(&self) -> [LegPhase; 2] {
        [self.legs[0].phase, self.legs[1].phase]
    }

    #[must_use]
    pub const fn token_table(&self) -> Option<&TokenTable> {
        self.token_table.as_ref()
    }

    #[must_use]
    pub const fn is_exited(&self) -> bool {
        self.exited.is_some()
    }

    /// Realized premium across both legs times the position size.
    #[must_use]
    pub fn profit(&self) -> Decimal {
        let per_contract: Decimal = self.legs.iter().filter_map(|l| l.realized).sum();
        per_contract * Decimal::from(self.config.quantity())
    }

    #[must_use]
    pub fn report(&self, exit_reason: ExitReason) -> SessionReport {
        SessionReport {
            exit_reason,
            legs: Leg::ALL
                .iter()
                .map(|&leg| {
                    let state = self.leg(leg);
                    LegSummary {
                        leg,
                        tradingsymbol: state.tradingsymbol.clone(),
                        phase: state.phase,
                        realized: state.realized,
                    }
                })
                .collect(),
            profit: self.profit(),
        }
    }

    /// Runs one tick. Returns the exit reason once the session is over.
    ///
    /// # Errors
    /// Entry failures, unparseable chains, and failed exits are returned.
    /// Lookup misses and broker timeouts are logged and skipped.
    pub async fn on_tick(
        &mut self,
        snapshot: &ChainSnapshot,
        now: NaiveDateTime,
    ) -> Result<Option<ExitReason>> {
        if let Some(reason) = self.exited {
            return Ok(Some(reason));
        }

        match decide(now, &self.config.window, self.phases()) {
            TickAction::Wait => {
                debug!(%now, entry = %self.config.window.entry, "Waiting for entry time");
                Ok(None)
            }
            TickAction::Exit(reason) => {
                info!(%now, %reason, "Exiting session");
                self.exit().await?;
                self.exited = Some(reason);
                Ok(Some(reason))
            }
            TickAction::Enter => {
                self.enter(snapshot).await?;
                Ok(None)
            }
            TickAction::Manage => {
                self.trail_stops(snapshot).await;
                self.monitor_triggers().await;
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    async fn recover(&mut self) -> Result<()> {
        for leg in Leg::ALL {
            let Some(entry) = self.recover_order(OrderRole::Entry, leg).await? else {
                continue;
            };
            let stop = self.recover_order(OrderRole::StopLoss, leg).await?;
            let target = self.recover_order(OrderRole::Target, leg).await?;

            info!(
                %leg,
                entry = %entry.order_id(),
                stop = ?stop.as_ref().map(OrderHandle::order_id),
                target = ?target.as_ref().map(OrderHandle::order_id),
                "Recovered leg from cache"
            );

            let state = &mut self.legs[leg.index()];
            state.tradingsymbol = entry.tradingsymbol().map(str::to_string);
            state.phase = LegPhase::Protected;
            state.stop_price = stop.as_ref().and_then(OrderHandle::trigger_price).unwrap_or_default();
            state.target_price = target.as_ref().and_then(OrderHandle::trigger_price).unwrap_or_default();
            state.entry = Some(entry);
            state.stop = stop;
            state.target = target;
        }
        for leg in Leg::ALL {
            if self.legs[leg.index()].phase == LegPhase::Protected {
                self.classify_recovered(leg).await;
            }
        }

        match self.phases() {
            [LegPhase::NotEntered, LegPhase::NotEntered] => {}
            [LegPhase::NotEntered, _] | [_, LegPhase::NotEntered] => {
                error!("Recovered only one leg; the other was never sold");
            }
            phases => info!(ce = %phases[0], pe = %phases[1], "Resuming session"),
        }
        Ok(())
    }

    /// Applies fills that happened while the process was down.
    ///
    /// A stop that died without a fill leaves the leg short and unprotected;
    /// the leg stays `Protected` so the next tick re-places the stop or the
    /// exit buys it back.
    async fn classify_recovered(&mut self, leg: Leg) {
        let i = leg.index();
        let stop_status = self.legs[i].stop.as_ref().map(OrderHandle::last_status);
        let target_status = self.legs[i].target.as_ref().map(OrderHandle::last_status);

        match (stop_status, target_status) {
            (Some(OrderStatus::Complete), _) => {
                if let Some(stop) = self.legs[i].stop.take() {
                    info!(%leg, order_id = %stop.order_id(), "Stop-loss filled while down");
                    self.close_leg(leg, LegPhase::StopHit, stop.average_price()).await;
                    self.cancel_target(leg.sibling()).await;
                }
            }
            (_, Some(OrderStatus::Complete)) => {
                if let Some(target) = self.legs[i].target.take() {
                    info!(%leg, order_id = %target.order_id(), "Target filled while down");
                    self.close_leg(leg, LegPhase::TargetHit, target.average_price()).await;
                }
            }
            (Some(status), _) if status.is_terminal() => {
                warn!(%leg, %status, "Recovered stop-loss is closed without a fill, leg is unprotected");
                self.forget_stop(leg).await;
            }
            _ => {}
        }
    }

    /// Discards a stop that can no longer fill, along with its cache entries,
    /// so the leg can be protected again.
    async fn forget_stop(&mut self, leg: Leg) {
        let i = leg.index();
        self.legs[i].stop = None;
        let key = self.config.cache_key(OrderRole::StopLoss, leg);
        if let Err(e) = self.context.cache.delete(&key).await {
            warn!(key = %key, error = %e, "Failed to drop cached stop-loss id");
        }
        if let Some(symbol) = self.legs[i].tradingsymbol.clone() {
            if let Err(e) = self
                .position(&symbol)
                .forget(OrderType::StopLoss, Side::Buy, None)
                .await
            {
                warn!(%leg, %symbol, error = %e, "Failed to drop stop-loss dedup entry");
            }
        }
    }

    async fn recover_order(&self, role: OrderRole, leg: Leg) -> Result<Option<OrderHandle>> {
        let key = self.config.cache_key(role, leg);
        let Some(raw) = self.context.cache.get(&key).await? else {
            return Ok(None);
        };
        let Ok(id) = String::from_utf8(raw) else {
            warn!(key = %key, "Cached order id is not UTF-8, dropping it");
            self.context.cache.delete(&key).await?;
            return Ok(None);
        };

        match OrderHandle::recover(Arc::clone(&self.context.gateway), OrderId::new(id)).await {
            Ok(handle) => Ok(Some(handle)),
            Err(BrokerError::OrderNotFound { order_id }) => {
                warn!(key = %key, %order_id, "Cached order unknown to broker, dropping it");
                self.context.cache.delete(&key).await?;
                Ok(None)
            }
            Err(e) => {
                error!(key = %key, %leg, error = %e, "Failed to recover cached order");
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // Entry
    // =========================================================================

    fn position(&self, symbol: &str) -> Position {
        Position::option(self.context.clone(), symbol, self.config.lot_size)
    }

    async fn persist(&self, role: OrderRole, leg: Leg, order_id: &OrderId) {
        let key = self.config.cache_key(role, leg);
        if let Err(e) = self
            .context
            .cache
            .set(&key, order_id.as_str().as_bytes(), self.config.order_ttl)
            .await
        {
            error!(key = %key, %order_id, error = %e, "Failed to persist order id");
        }
    }

    async fn enter(&mut self, snapshot: &ChainSnapshot) -> Result<()> {
        let underlying = self.config.underlying_symbol.clone();
        let table = TokenTable::from_snapshot(snapshot, &underlying, &self.config.expiry_marker)
            .map_err(|e| {
                error!(error = %e, marker = %self.config.expiry_marker, "Chain contains an unparseable symbol");
                EngineError::from(e)
            })?;
        let pair = match select_straddle(&table, snapshot, &underlying) {
            Ok(pair) => pair,
            Err(EngineError::MissingInstrument(symbol)) => {
                warn!(%symbol, "Entry skipped, instrument missing from snapshot");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.token_table = Some(table);

        let quantity = self.config.quantity();
        info!(
            strike = %pair.strike,
            call = %pair.call,
            put = %pair.put,
            call_premium = %pair.call_premium,
            put_premium = %pair.put_premium,
            quantity,
            "Entering straddle"
        );

        let mut sold: Option<(Leg, OrderId)> = None;
        for leg in Leg::ALL {
            let symbol = pair.symbol(leg.kind()).to_string();
            let order = match self.position(&symbol).sell(quantity, None, None).await {
                Ok(order) => order,
                Err(e) => {
                    let Some((placed, placed_order)) = sold else {
                        error!(%leg, %symbol, error = %e, "Entry sell failed, nothing placed");
                        return Err(e);
                    };
                    error!(
                        placed = %placed,
                        placed_order = %placed_order,
                        failed = %leg,
                        %symbol,
                        error = %e,
                        "Partial entry: one leg is live and unhedged"
                    );
                    return Err(match e {
                        EngineError::Broker(source) => EngineError::PartialEntry {
                            placed,
                            placed_order,
                            failed: leg,
                            source,
                        },
                        other => other,
                    });
                }
            };

            self.persist(OrderRole::Entry, leg, order.order_id()).await;
            sold = Some((leg, order.order_id().clone()));
            let state = &mut self.legs[leg.index()];
            state.tradingsymbol = Some(symbol);
            state.phase = LegPhase::Protected;
            state.entry = Some(order);
        }

        for leg in Leg::ALL {
            let premium = self.entry_premium(leg, pair.premium(leg.kind())).await;
            if let Err(e) = self.place_stop(leg, premium).await {
                error!(%leg, error = %e, "Stop-loss placement failed, retrying next tick");
            }
            if self.config.add_targets {
                if let Err(e) = self.place_target(leg, premium).await {
                    error!(%leg, error = %e, "Target placement failed");
                }
            }
        }
        Ok(())
    }

    /// Fill price of the leg's sell, or `fallback` while it is unknown.
    async fn entry_premium(&mut self, leg: Leg, fallback: Decimal) -> Decimal {
        let Some(entry) = self.legs[leg.index()].entry.as_mut() else {
            return fallback;
        };
        if entry.average_price().is_zero() {
            if let Err(e) = entry.status().await {
                warn!(%leg, order_id = %entry.order_id(), error = %e, "Entry fill price unavailable");
            }
        }
        let filled = entry.average_price();
        if filled.is_zero() {
            fallback
        } else {
            filled
        }
    }

    async fn place_stop(&mut self, leg: Leg, premium: Decimal) -> Result<()> {
        let stop = stop_loss_price(premium, &self.config.rules);
        self.place_stop_at(leg, premium, stop).await
    }

    async fn place_stop_at(&mut self, leg: Leg, premium: Decimal, stop: Decimal) -> Result<()> {
        let Some(symbol) = self.legs[leg.index()].tradingsymbol.clone() else {
            return Ok(());
        };
        let limit = limit_price(stop, &self.config.rules);
        let order = self
            .position(&symbol)
            .buy(self.config.quantity(), Some(limit), Some(stop))
            .await?;

        info!(%leg, %symbol, %premium, stop = %stop, limit = %limit, order_id = %order.order_id(), "Stop-loss placed");
        self.persist(OrderRole::StopLoss, leg, order.order_id()).await;
        let state = &mut self.legs[leg.index()];
        state.stop_price = stop;
        state.stop = Some(order);
        Ok(())
    }

    async fn place_target(&mut self, leg: Leg, premium: Decimal) -> Result<()> {
        let Some(symbol) = self.legs[leg.index()].tradingsymbol.clone() else {
            return Ok(());
        };
        let target = target_price(premium, &self.config.rules);
        let limit = limit_price(target, &self.config.rules);
        let order = self
            .position(&symbol)
            .buy_tagged(TARGET_TAG, self.config.quantity(), Some(limit), Some(target))
            .await?;

        info!(%leg, %symbol, %premium, target = %target, limit = %limit, order_id = %order.order_id(), "Target placed");
        self.persist(OrderRole::Target, leg, order.order_id()).await;
        let state = &mut self.legs[leg.index()];
        state.target_price = target;
        state.target = Some(order);
        Ok(())
    }

    // =========================================================================
    // Management
    // =========================================================================

    /// Re-protects legs without a stop, then tightens the stop of a leg
    /// whose sibling has closed once its premium decays past the trailing
    /// trigger. While both legs are open their stops stay put.
    async fn trail_stops(&mut self, snapshot: &ChainSnapshot) {
        for leg in Leg::ALL {
            let i = leg.index();
            if self.legs[i].phase != LegPhase::Protected {
                continue;
            }
            let Some(symbol) = self.legs[i].tradingsymbol.clone() else {
                continue;
            };
            let Some(premium) = snapshot.last_price(&symbol) else {
                warn!(%leg, %symbol, "No quote for leg this tick");
                continue;
            };

            let Some(stop) = self.legs[i].stop.clone() else {
                self.reprotect(leg, premium).await;
                continue;
            };
            if !self.legs[leg.sibling().index()].phase.is_terminal() {
                continue;
            }

            let Some(new_stop) = trailed_stop(self.legs[i].stop_price, premium, &self.config.rules)
            else {
                continue;
            };
            let limit = limit_price(new_stop, &self.config.rules);
            match stop.modify(Some(limit), Some(new_stop), None).await {
                Ok(moved) => {
                    if moved.order_id() != stop.order_id() {
                        self.persist(OrderRole::StopLoss, leg, moved.order_id()).await;
                    }
                    info!(%leg, old = %self.legs[i].stop_price, new = %new_stop, order_id = %moved.order_id(), "Stop-loss trailed");
                    self.legs[i].stop = Some(moved);
                    self.legs[i].stop_price = new_stop;
                }
                Err(e) => {
                    warn!(%leg, order_id = %stop.order_id(), error = %e, "Stop-loss modify failed");
                }
            }
        }
    }

    /// Places a fresh stop for a leg that has none, at its last stop price
    /// when it had one. A leg already trading through that price is bought
    /// back at market instead.
    async fn reprotect(&mut self, leg: Leg, premium: Decimal) {
        let i = leg.index();
        let base = self.entry_premium(leg, premium).await;
        let stop = if self.legs[i].stop_price.is_zero() {
            stop_loss_price(base, &self.config.rules)
        } else {
            self.legs[i].stop_price
        };

        if premium >= stop {
            warn!(%leg, %premium, %stop, "Unprotected leg is through its stop-loss, buying back");
            match self.buy_back(leg).await {
                Ok(fill) => {
                    self.close_leg(leg, LegPhase::StopHit, fill).await;
                    self.cancel_target(leg.sibling()).await;
                }
                Err(e) => error!(%leg, error = %e, "Failed to buy back unprotected leg"),
            }
            return;
        }
        if let Err(e) = self.place_stop_at(leg, base, stop).await {
            error!(%leg, error = %e, "Leg is unprotected, stop-loss placement failed");
        }
    }

    /// Reacts to stop and target fills.
    async fn monitor_triggers(&mut self) {
        for leg in Leg::ALL {
            let i = leg.index();
            if self.legs[i].phase != LegPhase::Protected {
                continue;
            }

            if let Some(mut stop) = self.legs[i].stop.take() {
                match stop.status().await {
                    Ok(OrderStatus::Complete) => {
                        info!(%leg, order_id = %stop.order_id(), fill = %stop.average_price(), "Stop-loss hit");
                        self.close_leg(leg, LegPhase::StopHit, stop.average_price()).await;
                        self.cancel_target(leg.sibling()).await;
                        continue;
                    }
                    Ok(OrderStatus::Unknown) => {
                        warn!(%leg, order_id = %stop.order_id(), "Stop-loss status unknown");
                        self.legs[i].stop = Some(stop);
                    }
                    Ok(status) if status.is_terminal() => {
                        error!(%leg, order_id = %stop.order_id(), %status, "Stop-loss closed without a fill, leg is unprotected");
                        self.forget_stop(leg).await;
                    }
                    Ok(_) => self.legs[i].stop = Some(stop),
                    Err(e) => {
                        warn!(%leg, order_id = %stop.order_id(), error = %e, "Stop-loss status failed");
                        self.legs[i].stop = Some(stop);
                    }
                }
            }

            if let Some(mut target) = self.legs[i].target.take() {
                match target.status().await {
                    Ok(OrderStatus::Complete) => {
                        info!(%leg, order_id = %target.order_id(), fill = %target.average_price(), "Target hit");
                        self.close_leg(leg, LegPhase::TargetHit, target.average_price()).await;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%leg, order_id = %target.order_id(), error = %e, "Target status failed");
                    }
                }
                self.legs[i].target = Some(target);
            }
        }
    }

    /// Marks a leg closed at `exit_price` and cancels its remaining
    /// protective orders, which would otherwise open a new position.
    async fn close_leg(&mut self, leg: Leg, phase: LegPhase, exit_price: Decimal) {
        let entry_price = self.entry_premium(leg, Decimal::ZERO).await;
        let state = &mut self.legs[leg.index()];
        state.phase = phase;
        if !entry_price.is_zero() && !exit_price.is_zero() {
            state.realized = Some(entry_price - exit_price);
        }

        if let Some(mut stop) = self.legs[leg.index()].stop.take() {
            if let Err(e) = stop.cancel().await {
                error!(%leg, order_id = %stop.order_id(), error = %e, "Failed to cancel stop-loss of closed leg");
                self.legs[leg.index()].stop = Some(stop);
            }
        }
        self.cancel_target(leg).await;
    }

    async fn cancel_target(&mut self, leg: Leg) {
        let Some(mut target) = self.legs[leg.index()].target.take() else {
            return;
        };
        match target.cancel().await {
            Ok(()) => info!(%leg, order_id = %target.order_id(), "Target cancelled"),
            Err(e) => {
                error!(%leg, order_id = %target.order_id(), error = %e, "Failed to cancel target");
                self.legs[leg.index()].target = Some(target);
            }
        }
    }

    // =========================================================================
    // Exit
    // =========================================================================

    /// Market buy closing a leg, recorded in the stop-loss slot so a restart
    /// sees the leg as closed. Returns the fill price, zero while unknown.
    async fn buy_back(&mut self, leg: Leg) -> Result<Decimal> {
        let Some(symbol) = self.legs[leg.index()].tradingsymbol.clone() else {
            return Ok(Decimal::ZERO);
        };
        let mut order = self
            .position(&symbol)
            .buy_tagged(EXIT_TAG, self.config.quantity(), None, None)
            .await?;
        warn!(%leg, %symbol, order_id = %order.order_id(), "Leg bought back at market");
        self.persist(OrderRole::StopLoss, leg, order.order_id()).await;

        Ok(match order.status().await {
            Ok(OrderStatus::Complete) => order.average_price(),
            _ => Decimal::ZERO,
        })
    }

    /// Buys back a sold leg that has no working stop.
    async fn square_off_unprotected(&mut self, leg: Leg) -> Result<()> {
        let fill = self.buy_back(leg).await?;
        let entry = self.entry_premium(leg, Decimal::ZERO).await;
        let state = &mut self.legs[leg.index()];
        state.phase = LegPhase::Exited;
        if !fill.is_zero() && !entry.is_zero() {
            state.realized = Some(entry - fill);
        }
        Ok(())
    }

    /// Buys back protected legs at market and cancels every open target.
    ///
    /// # Errors
    /// Returns [`EngineError::Exit`] listing every order that could not be
    /// handled; the rest are still processed.
    pub async fn exit(&mut self) -> Result<()> {
        let mut failures = Vec::new();

        for leg in Leg::ALL {
            let i = leg.index();
            if let Some(mut stop) = self.legs[i].stop.take() {
                if self.legs[i].phase == LegPhase::Protected {
                    match stop.modify(None, None, Some(OrderType::Market)).await {
                        Ok(mut squared) => {
                            info!(%leg, order_id = %squared.order_id(), "Stop-loss converted to market");
                            if squared.order_id() != stop.order_id() {
                                self.persist(OrderRole::StopLoss, leg, squared.order_id()).await;
                            }
                            let fill = match squared.status().await {
                                Ok(OrderStatus::Complete) => squared.average_price(),
                                _ => Decimal::ZERO,
                            };
                            let entry = self.entry_premium(leg, Decimal::ZERO).await;
                            let state = &mut self.legs[i];
                            state.phase = LegPhase::Exited;
                            if !fill.is_zero() && !entry.is_zero() {
                                state.realized = Some(entry - fill);
                            }
                        }
                        Err(e) => match stop.status().await {
                            Ok(OrderStatus::Complete) => {
                                info!(%leg, order_id = %stop.order_id(), "Stop-loss filled before exit");
                                self.close_leg(leg, LegPhase::StopHit, stop.average_price()).await;
                            }
                            Ok(status) if status.is_terminal() => {
                                warn!(%leg, order_id = %stop.order_id(), %status, "Stop-loss is dead, buying back instead");
                                self.forget_stop(leg).await;
                            }
                            _ => {
                                error!(%leg, order_id = %stop.order_id(), error = %e, "Failed to square off leg");
                                failures.push(format!("{leg} stop {}: {e}", stop.order_id()));
                                self.legs[i].stop = Some(stop);
                            }
                        },
                    }
                } else if let Err(e) = stop.cancel().await {
                    failures.push(format!("{leg} stop {}: {e}", stop.order_id()));
                    self.legs[i].stop = Some(stop);
                }
            }

            if self.legs[i].phase == LegPhase::Protected && self.legs[i].stop.is_none() {
                if let Err(e) = self.square_off_unprotected(leg).await {
                    error!(%leg, error = %e, "Failed to buy back unprotected leg");
                    failures.push(format!("{leg} buy-back: {e}"));
                }
            }

            if let Some(mut target) = self.legs[i].target.take() {
                match target.cancel().await {
                    Ok(()) => info!(%leg, order_id = %target.order_id(), "Target cancelled at exit"),
                    Err(e) => {
                        error!(%leg, order_id = %target.order_id(), error = %e, "Failed to cancel target");
                        failures.push(format!("{leg} target {}: {e}", target.order_id()));
                        self.legs[i].target = Some(target);
                    }
                }
            }
        }

        info!(profit = %self.profit(), "Session exit complete");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Exit(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PricingRules, SessionWindow};
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use straddle_core::MemoryCache;
    use straddle_kite::PaperGateway;

    const CE: &str = "NIFTY23O1919500CE";
    const PE: &str = "NIFTY23O1919500PE";

    fn config() -> StraddleConfig {
        StraddleConfig {
            name: "test".to_string(),
            underlying_symbol: "NIFTY 50".to_string(),
            expiry_marker: "23O19".to_string(),
            lots: 1,
            lot_size: 50,
            window: SessionWindow {
                entry: NaiveTime::from_hms_opt(9, 20, 0).unwrap(),
                exit: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            },
            rules: PricingRules::default(),
            add_targets: true,
            order_ttl: Duration::from_secs(43_200),
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn snapshot(ce: Decimal, pe: Decimal) -> ChainSnapshot {
        ChainSnapshot::from_pairs([
            ("NIFTY 50", dec!(19502)),
            (CE, ce),
            (PE, pe),
            ("NIFTY23O1919450CE", dec!(80)),
            ("NIFTY23O1919450PE", dec!(30)),
        ])
    }

    fn engine(paper: &Arc<PaperGateway>) -> StraddleEngine {
        StraddleEngine::new(config(), paper.clone(), Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn waits_before_entry_time() {
        let paper = Arc::new(PaperGateway::new());
        let mut engine = engine(&paper);
        let snap = snapshot(dec!(52.3), dec!(40));
        assert_eq!(engine.on_tick(&snap, at(9, 15)).await.unwrap(), None);
        assert_eq!(paper.placed_count(), 0);
    }

    #[tokio::test]
    async fn entry_sells_both_legs_with_stops_and_targets() {
        let paper = Arc::new(PaperGateway::new());
        let mut engine = engine(&paper);
        let snap = snapshot(dec!(52.3), dec!(40));
        paper.mark_snapshot(&snap);

        engine.on_tick(&snap, at(9, 20)).await.unwrap();

        assert_eq!(paper.placed_count(), 6);
        let ce = engine.leg(Leg::Ce);
        assert_eq!(ce.phase, LegPhase::Protected);
        assert_eq!(ce.tradingsymbol.as_deref(), Some(CE));
        assert_eq!(ce.stop_price, dec!(57.50));
        assert_eq!(ce.target_price, dec!(26.15));
        let stop = paper.order(ce.stop.as_ref().unwrap().order_id()).unwrap();
        assert_eq!(stop.price, Some(dec!(59.50)));
        assert_eq!(stop.trigger_price, Some(dec!(57.50)));
        assert_eq!(engine.leg(Leg::Pe).stop_price, dec!(44));
        assert_eq!(engine.token_table().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn missing_quote_skips_trailing() {
        let paper = Arc::new(PaperGateway::new());
        let mut engine = engine(&paper);
        let snap = snapshot(dec!(52.3), dec!(40));
        paper.mark_snapshot(&snap);
        engine.on_tick(&snap, at(9, 20)).await.unwrap();

        let sparse = ChainSnapshot::from_pairs([("NIFTY 50", dec!(19502))]);
        assert_eq!(engine.on_tick(&sparse, at(9, 21)).await.unwrap(), None);
        assert_eq!(engine.leg(Leg::Ce).stop_price, dec!(57.50));
    }

    #[tokio::test]
    async fn exit_buys_back_leg_without_stop() {
        let paper = Arc::new(PaperGateway::new());
        let mut engine = engine(&paper);
        let snap = snapshot(dec!(52.3), dec!(40));
        paper.mark_snapshot(&snap);
        engine.on_tick(&snap, at(9, 20)).await.unwrap();

        // Stop rejected by the exchange and never re-placed.
        let mut stop = engine.legs[Leg::Ce.index()].stop.take().unwrap();
        stop.cancel().await.unwrap();
        let placed = paper.placed_count();

        let snap = snapshot(dec!(50), dec!(40));
        paper.mark_snapshot(&snap);
        let reason = engine.on_tick(&snap, at(15, 1)).await.unwrap();

        assert_eq!(reason, Some(ExitReason::ExitTime));
        assert_eq!(paper.placed_count(), placed + 1);
        let ce = engine.leg(Leg::Ce);
        assert_eq!(ce.phase, LegPhase::Exited);
        assert_eq!(ce.realized, Some(dec!(2.3)));
        assert_eq!(engine.leg(Leg::Pe).phase, LegPhase::Exited);
    }

    #[tokio::test]
    async fn trailing_waits_for_sibling_to_close() {
        let paper = Arc::new(PaperGateway::new());
        let mut engine = engine(&paper);
        let snap = snapshot(dec!(52.3), dec!(40));
        paper.mark_snapshot(&snap);
        engine.on_tick(&snap, at(9, 20)).await.unwrap();

        // CE has decayed well past the trailing trigger, PE is still open.
        let snap = snapshot(dec!(40), dec!(42));
        paper.mark_snapshot(&snap);
        engine.on_tick(&snap, at(10, 0)).await.unwrap();
        assert_eq!(engine.phases(), [LegPhase::Protected, LegPhase::Protected]);
        assert_eq!(engine.leg(Leg::Ce).stop_price, dec!(57.50));

        let snap = snapshot(dec!(40), dec!(45));
        for minute in [1, 2] {
            paper.mark_snapshot(&snap);
            engine.on_tick(&snap, at(10, minute)).await.unwrap();
        }
        assert_eq!(engine.leg(Leg::Pe).phase, LegPhase::StopHit);
        assert_eq!(engine.leg(Leg::Ce).stop_price, dec!(44.00));
    }

    #[tokio::test]
    async fn unprotected_leg_through_its_stop_is_bought_back() {
        let paper = Arc::new(PaperGateway::new());
        let mut engine = engine(&paper);
        let snap = snapshot(dec!(52.3), dec!(40));
        paper.mark_snapshot(&snap);
        engine.on_tick(&snap, at(9, 20)).await.unwrap();
        let stop_id = engine.leg(Leg::Ce).stop.as_ref().unwrap().order_id().clone();
        let pe_target = engine.leg(Leg::Pe).target.as_ref().unwrap().order_id().clone();
        paper.set_status(&stop_id, OrderStatus::Cancelled);

        let snap = snapshot(dec!(50), dec!(40));
        paper.mark_snapshot(&snap);
        engine.on_tick(&snap, at(10, 0)).await.unwrap();
        assert!(engine.leg(Leg::Ce).stop.is_none());
        assert_eq!(engine.leg(Leg::Ce).phase, LegPhase::Protected);

        let placed = paper.placed_count();
        let snap = snapshot(dec!(60), dec!(40));
        paper.mark_snapshot(&snap);
        engine.on_tick(&snap, at(10, 1)).await.unwrap();

        let ce = engine.leg(Leg::Ce);
        assert_eq!(ce.phase, LegPhase::StopHit);
        assert_eq!(ce.realized, Some(dec!(-7.7)));
        assert_eq!(paper.placed_count(), placed + 1);
        assert_eq!(paper.cancel_count(&pe_target), 1);
    }

    #[tokio::test]
    async fn target_fill_cancels_own_stop() {
        let paper = Arc::new(PaperGateway::new());
        let mut engine = engine(&paper);
        let snap = snapshot(dec!(52.3), dec!(40));
        paper.mark_snapshot(&snap);
        engine.on_tick(&snap, at(9, 20)).await.unwrap();
        let stop_id = engine.leg(Leg::Ce).stop.as_ref().unwrap().order_id().clone();

        let snap = snapshot(dec!(26), dec!(40));
        paper.mark_snapshot(&snap);
        engine.on_tick(&snap, at(10, 0)).await.unwrap();

        let ce = engine.leg(Leg::Ce);
        assert_eq!(ce.phase, LegPhase::TargetHit);
        assert!(ce.stop.is_none());
        assert_eq!(paper.cancel_count(&stop_id), 1);
        assert_eq!(ce.realized, Some(dec!(26.3)));
    }
}
