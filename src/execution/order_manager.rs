// =============================================================================
// Order Manager — two-leg spread execution with smart order routing
// =============================================================================
//
// Entry executes leg A, waits 100 ms, then executes leg B; the legs are never
// in flight together.  If leg B fails after A filled, a compensating
// reduce-only exit on leg A is submitted immediately so the book never holds
// an unhedged leg.  That compensation is the only rollback guarantee: exits
// retry down to a market order and, if even that fails, the position stays
// open for human intervention.
//
// Smart order (per leg): up to three limit attempts at
// `price * (1 +- step*k)` (buy above / sell below the market to chase the
// fill), polling the order after a fixed wait; partial fills are cancelled
// and retried for the remainder, with fills accumulated at their
// notional-weighted price.  A market order is the last resort.
//
// With trading disabled every execution is simulated locally at 0.05%
// slippage; quantity derivation and validation run exactly as in live mode.
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use crate::market_data::MarketDataManager;
use crate::types::{OrderSide, PositionSide, SpreadAction};

use super::broker::{Broker, FillState, OrderRequest, OrderType};
use super::rate_limiter::OrderRateLimiter;
use super::symbols::SymbolProfile;

/// Limit-price step per attempt: entries chase by 0.03%, exits by 0.05%.
const ENTRY_PRICE_STEP: f64 = 0.0003;
const EXIT_PRICE_STEP: f64 = 0.0005;
/// Fill-poll wait per attempt.
const ENTRY_FILL_WAIT_MS: u64 = 1_500;
const EXIT_FILL_WAIT_MS: u64 = 2_000;
const MAX_LIMIT_ATTEMPTS: u32 = 3;
/// Pacing delay between leg A and leg B.
const LEG_PACING_MS: u64 = 100;
/// Slippage assumed for simulated fills.
const SIM_SLIPPAGE: f64 = 0.0005;

/// Whether a smart order opens or reduces exposure; selects price step,
/// poll wait, and the reduce-only flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderMode {
    Entry,
    Exit,
}

impl OrderMode {
    fn price_step(self) -> f64 {
        match self {
            Self::Entry => ENTRY_PRICE_STEP,
            Self::Exit => EXIT_PRICE_STEP,
        }
    }

    fn fill_wait_ms(self) -> u64 {
        match self {
            Self::Entry => ENTRY_FILL_WAIT_MS,
            Self::Exit => EXIT_FILL_WAIT_MS,
        }
    }

    fn reduce_only(self) -> bool {
        matches!(self, Self::Exit)
    }
}

/// Executed quantity and notional-weighted average price of one leg.
#[derive(Debug, Clone, Copy)]
struct LegFill {
    qty: f64,
    avg_price: f64,
}

/// Result of a two-leg entry.
#[derive(Debug, Clone)]
pub struct PairEntryFill {
    pub side_a: PositionSide,
    pub side_b: PositionSide,
    pub qty_a: f64,
    pub qty_b: f64,
    pub entry_price_a: f64,
    pub entry_price_b: f64,
    pub simulated: bool,
}

/// Result of a two-leg exit.
#[derive(Debug, Clone)]
pub struct PairExitFill {
    pub qty_a: f64,
    pub qty_b: f64,
    pub exit_price_a: f64,
    pub exit_price_b: f64,
    pub simulated: bool,
}

pub struct OrderManager {
    broker: Arc<dyn Broker>,
    market_data: Arc<MarketDataManager>,
    rate_limiter: Arc<OrderRateLimiter>,
    trading_enabled: bool,
}

impl OrderManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        market_data: Arc<MarketDataManager>,
        rate_limiter: Arc<OrderRateLimiter>,
        trading_enabled: bool,
    ) -> Self {
        Self {
            broker,
            market_data,
            rate_limiter,
            trading_enabled,
        }
    }

    // ── Pair entry ──────────────────────────────────────────────────────

    /// Execute both legs of a spread entry.  USD notionals are converted to
    /// base quantities at the live price, rounded and validated per symbol.
    pub async fn execute_pair_entry(
        &self,
        pair_id: &str,
        symbol_a: &str,
        symbol_b: &str,
        action: SpreadAction,
        size_a_usd: f64,
        size_b_usd: f64,
    ) -> Result<PairEntryFill> {
        let (side_a, side_b) = match action {
            SpreadAction::LongSpread => (OrderSide::Buy, OrderSide::Sell),
            SpreadAction::ShortSpread => (OrderSide::Sell, OrderSide::Buy),
            other => bail!("invalid entry action: {other}"),
        };

        let price_a = self.resolve_price(symbol_a).await?;
        let price_b = self.resolve_price(symbol_b).await?;

        let qty_a = derive_qty(symbol_a, size_a_usd, price_a)?;
        let qty_b = derive_qty(symbol_b, size_b_usd, price_b)?;

        info!(
            pair = pair_id,
            action = %action,
            qty_a,
            qty_b,
            price_a,
            price_b,
            "executing pair entry"
        );

        if !self.trading_enabled {
            return Ok(PairEntryFill {
                side_a: PositionSide::from_order_side(side_a),
                side_b: PositionSide::from_order_side(side_b),
                qty_a,
                qty_b,
                entry_price_a: slipped_price(price_a, side_a),
                entry_price_b: slipped_price(price_b, side_b),
                simulated: true,
            });
        }

        // Leg A first; its terminal state gates leg B.
        let fill_a = self
            .smart_order(symbol_a, side_a, qty_a, price_a, OrderMode::Entry)
            .await
            .with_context(|| format!("leg A ({symbol_a}) entry failed"))?;

        tokio::time::sleep(tokio::time::Duration::from_millis(LEG_PACING_MS)).await;

        match self
            .smart_order(symbol_b, side_b, qty_b, price_b, OrderMode::Entry)
            .await
        {
            Ok(fill_b) => {
                info!(
                    pair = pair_id,
                    qty_a = fill_a.qty,
                    price_a = fill_a.avg_price,
                    qty_b = fill_b.qty,
                    price_b = fill_b.avg_price,
                    "pair entry executed"
                );
                Ok(PairEntryFill {
                    side_a: PositionSide::from_order_side(side_a),
                    side_b: PositionSide::from_order_side(side_b),
                    qty_a: fill_a.qty,
                    qty_b: fill_b.qty,
                    entry_price_a: fill_a.avg_price,
                    entry_price_b: fill_b.avg_price,
                    simulated: false,
                })
            }
            Err(leg_b_err) => {
                // Leg A is live and unhedged: close it immediately.
                warn!(
                    pair = pair_id,
                    symbol = symbol_a,
                    qty = fill_a.qty,
                    "leg B failed, closing leg A to avoid an unhedged position"
                );
                match self
                    .smart_order(
                        symbol_a,
                        side_a.opposite(),
                        fill_a.qty,
                        fill_a.avg_price,
                        OrderMode::Exit,
                    )
                    .await
                {
                    Ok(_) => bail!("leg B failed ({leg_b_err:#}); leg A compensated"),
                    Err(comp_err) => {
                        error!(
                            pair = pair_id,
                            symbol = symbol_a,
                            qty = fill_a.qty,
                            error = %comp_err,
                            "COMPENSATION FAILED: unhedged leg remains open"
                        );
                        bail!(
                            "leg B failed ({leg_b_err:#}); compensation failed ({comp_err:#})"
                        )
                    }
                }
            }
        }
    }

    // ── Pair exit ───────────────────────────────────────────────────────

    /// Close both legs of an open position (reduce-only smart orders).
    pub async fn execute_pair_exit(
        &self,
        pair_id: &str,
        symbol_a: &str,
        symbol_b: &str,
        side_a: PositionSide,
        side_b: PositionSide,
        qty_a: f64,
        qty_b: f64,
    ) -> Result<PairExitFill> {
        let exit_side_a = side_a.exit_order_side();
        let exit_side_b = side_b.exit_order_side();

        let price_a = self.resolve_price(symbol_a).await?;
        let price_b = self.resolve_price(symbol_b).await?;

        let qty_a = SymbolProfile::for_symbol(symbol_a).round_qty(qty_a);
        let qty_b = SymbolProfile::for_symbol(symbol_b).round_qty(qty_b);

        info!(pair = pair_id, qty_a, qty_b, "executing pair exit");

        if !self.trading_enabled {
            return Ok(PairExitFill {
                qty_a,
                qty_b,
                exit_price_a: slipped_price(price_a, exit_side_a),
                exit_price_b: slipped_price(price_b, exit_side_b),
                simulated: true,
            });
        }

        let fill_a = self
            .smart_order(symbol_a, exit_side_a, qty_a, price_a, OrderMode::Exit)
            .await
            .with_context(|| format!("leg A ({symbol_a}) exit failed; position remains open"))?;

        let fill_b = self
            .smart_order(symbol_b, exit_side_b, qty_b, price_b, OrderMode::Exit)
            .await
            .with_context(|| format!("leg B ({symbol_b}) exit failed; position remains open"))?;

        info!(
            pair = pair_id,
            qty_a = fill_a.qty,
            price_a = fill_a.avg_price,
            qty_b = fill_b.qty,
            price_b = fill_b.avg_price,
            "pair exit executed"
        );

        Ok(PairExitFill {
            qty_a: fill_a.qty,
            qty_b: fill_b.qty,
            exit_price_a: fill_a.avg_price,
            exit_price_b: fill_b.avg_price,
            simulated: false,
        })
    }

    // ── Smart order ─────────────────────────────────────────────────────

    /// Limit-then-market routine for a single leg.
    ///
    /// Fills are accumulated across attempts (partials included) and
    /// reported at their notional-weighted average price.
    async fn smart_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: f64,
        reference_price: f64,
        mode: OrderMode,
    ) -> Result<LegFill> {
        let mut remaining = qty;
        let mut filled_qty = 0.0;
        let mut filled_notional = 0.0;

        for attempt in 0..MAX_LIMIT_ATTEMPTS {
            self.rate_limiter.acquire(symbol).await;

            // Chase the market: buys quote above, sells below.
            let step = mode.price_step() * attempt as f64;
            let limit_price = match side {
                OrderSide::Buy => reference_price * (1.0 + step),
                OrderSide::Sell => reference_price * (1.0 - step),
            };

            info!(
                symbol,
                side = %side,
                qty = remaining,
                limit_price,
                attempt = attempt + 1,
                "placing limit order"
            );

            let ack = match self
                .broker
                .place_order(&OrderRequest {
                    symbol: symbol.to_string(),
                    side,
                    order_type: OrderType::Limit,
                    qty: remaining,
                    price: Some(limit_price),
                    reduce_only: mode.reduce_only(),
                })
                .await
            {
                Ok(ack) => ack,
                Err(e) => {
                    if is_rate_limit_error(&e) {
                        self.rate_limiter.report_error(&format!("{e:#}"));
                    }
                    warn!(symbol, attempt = attempt + 1, error = %e, "limit order placement failed");
                    continue;
                }
            };

            tokio::time::sleep(tokio::time::Duration::from_millis(mode.fill_wait_ms())).await;

            match self.broker.order_status(symbol, &ack.order_id).await {
                Ok(Some(status)) => match status.state {
                    FillState::Filled => {
                        let qty_now = status.cum_exec_qty.unwrap_or(remaining);
                        let price_now = status.avg_price.unwrap_or(limit_price);
                        filled_qty += qty_now;
                        filled_notional += qty_now * price_now;
                        self.rate_limiter.report_success();
                        return Ok(LegFill {
                            qty: filled_qty,
                            avg_price: filled_notional / filled_qty,
                        });
                    }
                    FillState::PartiallyFilled => {
                        let qty_now = status.cum_exec_qty.unwrap_or(0.0);
                        warn!(
                            symbol,
                            filled = qty_now,
                            requested = remaining,
                            "partial fill, cancelling and retrying the remainder"
                        );
                        let _ = self.broker.cancel_order(symbol, &ack.order_id).await;
                        if qty_now > 0.0 {
                            let price_now = status.avg_price.unwrap_or(limit_price);
                            filled_qty += qty_now;
                            filled_notional += qty_now * price_now;
                            remaining -= qty_now;
                        }
                        if remaining <= 0.0 {
                            self.rate_limiter.report_success();
                            return Ok(LegFill {
                                qty: filled_qty,
                                avg_price: filled_notional / filled_qty,
                            });
                        }
                    }
                    _ => {
                        warn!(symbol, attempt = attempt + 1, "order not filled, cancelling");
                        let _ = self.broker.cancel_order(symbol, &ack.order_id).await;
                    }
                },
                Ok(None) => {
                    // No longer on the open-order book: it filled.
                    filled_qty += remaining;
                    filled_notional += remaining * limit_price;
                    self.rate_limiter.report_success();
                    return Ok(LegFill {
                        qty: filled_qty,
                        avg_price: filled_notional / filled_qty,
                    });
                }
                Err(e) => {
                    warn!(symbol, error = %e, "order status query failed");
                    let _ = self.broker.cancel_order(symbol, &ack.order_id).await;
                }
            }
        }

        // Limit attempts exhausted: force a market order for the remainder.
        warn!(symbol, qty = remaining, "limit attempts exhausted, forcing market order");
        self.rate_limiter.acquire(symbol).await;

        match self
            .broker
            .place_order(&OrderRequest {
                symbol: symbol.to_string(),
                side,
                order_type: OrderType::Market,
                qty: remaining,
                price: None,
                reduce_only: mode.reduce_only(),
            })
            .await
        {
            Ok(ack) => {
                let qty_now = ack.cum_exec_qty.unwrap_or(remaining);
                let price_now = ack.avg_price.unwrap_or(reference_price);
                filled_qty += qty_now;
                filled_notional += qty_now * price_now;
                self.rate_limiter.report_success();
                info!(symbol, qty = qty_now, avg_price = price_now, "market order filled");
                Ok(LegFill {
                    qty: filled_qty,
                    avg_price: filled_notional / filled_qty,
                })
            }
            Err(e) => {
                if is_rate_limit_error(&e) {
                    self.rate_limiter.report_error(&format!("{e:#}"));
                }
                error!(symbol, error = %e, "market order failed");
                Err(e).context("market fallback failed")
            }
        }
    }

    // ── Price resolution ────────────────────────────────────────────────

    /// Live price with validation: the WebSocket cache first, then one REST
    /// re-fetch when the cached value is missing or insane.
    async fn resolve_price(&self, symbol: &str) -> Result<f64> {
        let profile = SymbolProfile::for_symbol(symbol);

        if let Some(price) = self.market_data.price(symbol) {
            if profile.price_is_sane(price) {
                return Ok(price);
            }
            warn!(symbol, price, "cached price failed sanity check, re-fetching");
        }

        let price = self
            .broker
            .last_price(symbol)
            .await
            .with_context(|| format!("REST price fetch for {symbol} failed"))?;

        if !profile.price_is_sane(price) {
            bail!("price for {symbol} is invalid: {price}");
        }
        Ok(price)
    }
}

impl std::fmt::Debug for OrderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderManager")
            .field("trading_enabled", &self.trading_enabled)
            .finish()
    }
}

/// USD notional -> rounded, validated base quantity.
fn derive_qty(symbol: &str, size_usd: f64, price: f64) -> Result<f64> {
    let profile = SymbolProfile::for_symbol(symbol);
    let qty = profile.round_qty(size_usd / price);

    if qty < profile.min_qty {
        bail!(
            "{symbol} qty {qty} below minimum {} (size ${size_usd:.2} @ {price})",
            profile.min_qty
        );
    }
    if qty > profile.max_qty {
        bail!(
            "{symbol} qty {qty} above cap {} (size ${size_usd:.2} @ {price})",
            profile.max_qty
        );
    }
    Ok(qty)
}

fn slipped_price(price: f64, side: OrderSide) -> f64 {
    match side {
        OrderSide::Buy => price * (1.0 + SIM_SLIPPAGE),
        OrderSide::Sell => price * (1.0 - SIM_SLIPPAGE),
    }
}

fn is_rate_limit_error(err: &anyhow::Error) -> bool {
    let msg = format!("{err:#}").to_lowercase();
    msg.contains("rate limit") || msg.contains("too many") || msg.contains("10006") || msg.contains("ioc")
}

// =============================================================================
// Tests (paused clock: fill-poll waits advance instantly)
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::broker::mock::{MockBroker, PlaceOutcome};
    use crate::execution::broker::OrderStatus;

    fn manager(broker: Arc<MockBroker>, trading_enabled: bool) -> OrderManager {
        let market_data = Arc::new(MarketDataManager::new());
        market_data.apply_ticker("BTCUSDT", Some(60_000.0), None);
        market_data.apply_ticker("ETHUSDT", Some(3_000.0), None);
        market_data.apply_ticker("XRPUSDT", Some(0.5), None);
        OrderManager::new(
            broker,
            market_data,
            Arc::new(OrderRateLimiter::new()),
            trading_enabled,
        )
    }

    fn status(state: FillState, qty: Option<f64>, price: Option<f64>) -> Option<OrderStatus> {
        Some(OrderStatus {
            state,
            cum_exec_qty: qty,
            avg_price: price,
        })
    }

    // ---- Smart order ----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn limit_fill_on_third_attempt_avoids_market_order() {
        let broker = Arc::new(MockBroker::new());
        broker.script_status(status(FillState::New, None, None));
        broker.script_status(status(FillState::New, None, None));
        broker.script_status(status(FillState::Filled, None, None));

        let mgr = manager(broker.clone(), true);
        let fill = mgr
            .smart_order("BTCUSDT", OrderSide::Sell, 0.01, 60_000.0, OrderMode::Exit)
            .await
            .unwrap();

        let placed = broker.placed_orders();
        assert_eq!(placed.len(), 3, "exactly three limit attempts");
        assert!(placed.iter().all(|o| o.order_type == OrderType::Limit));
        assert_eq!(broker.cancel_count(), 2);

        // Average price equals the third attempt's limit price.
        let expected = 60_000.0 * (1.0 - EXIT_PRICE_STEP * 2.0);
        assert!((fill.avg_price - expected).abs() < 1e-9);
        assert!((fill.qty - 0.01).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn market_fallback_after_three_unfilled_limits() {
        let broker = Arc::new(MockBroker::new());
        for _ in 0..3 {
            broker.script_status(status(FillState::New, None, None));
        }

        let mgr = manager(broker.clone(), true);
        let fill = mgr
            .smart_order("BTCUSDT", OrderSide::Buy, 0.01, 60_000.0, OrderMode::Entry)
            .await
            .unwrap();

        let placed = broker.placed_orders();
        assert_eq!(placed.len(), 4);
        assert_eq!(placed[3].order_type, OrderType::Market);
        // Mock market acks carry no price; the reference price is assumed.
        assert!((fill.avg_price - 60_000.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_fills_accumulate_at_weighted_price() {
        let broker = Arc::new(MockBroker::new());
        broker.script_status(status(FillState::PartiallyFilled, Some(0.6), Some(100.0)));
        broker.script_status(status(FillState::Filled, Some(0.4), Some(101.0)));

        let mgr = manager(broker.clone(), true);
        let fill = mgr
            .smart_order("SOLUSDT", OrderSide::Buy, 1.0, 100.0, OrderMode::Entry)
            .await
            .unwrap();

        assert!((fill.qty - 1.0).abs() < 1e-12);
        // (0.6*100 + 0.4*101) / 1.0
        assert!((fill.avg_price - 100.4).abs() < 1e-9);

        // Second attempt asked only for the remainder.
        let placed = broker.placed_orders();
        assert_eq!(placed.len(), 2);
        assert!((placed[1].qty - 0.4).abs() < 1e-12);
        assert_eq!(broker.cancel_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_order_is_treated_as_filled_at_limit_price() {
        let broker = Arc::new(MockBroker::new());
        broker.script_status(None);

        let mgr = manager(broker.clone(), true);
        let fill = mgr
            .smart_order("ETHUSDT", OrderSide::Buy, 0.5, 3_000.0, OrderMode::Entry)
            .await
            .unwrap();
        assert!((fill.qty - 0.5).abs() < 1e-12);
        assert!((fill.avg_price - 3_000.0).abs() < 1e-9);
        assert_eq!(broker.placed_orders().len(), 1);
    }

    // ---- Pair entry -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn entry_executes_leg_a_before_leg_b() {
        let broker = Arc::new(MockBroker::new());
        broker.script_status(status(FillState::Filled, Some(0.01), Some(60_000.0)));
        broker.script_status(status(FillState::Filled, Some(0.2), Some(3_000.0)));

        let mgr = manager(broker.clone(), true);
        let fill = mgr
            .execute_pair_entry(
                "BTCUSDT_ETHUSDT",
                "BTCUSDT",
                "ETHUSDT",
                SpreadAction::LongSpread,
                600.0,
                600.0,
            )
            .await
            .unwrap();

        let placed = broker.placed_orders();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].symbol, "BTCUSDT");
        assert_eq!(placed[0].side, OrderSide::Buy);
        assert!(!placed[0].reduce_only);
        assert_eq!(placed[1].symbol, "ETHUSDT");
        assert_eq!(placed[1].side, OrderSide::Sell);

        assert_eq!(fill.side_a, PositionSide::Long);
        assert_eq!(fill.side_b, PositionSide::Short);
        assert!(!fill.simulated);
    }

    #[tokio::test(start_paused = true)]
    async fn leg_b_failure_triggers_reduce_only_compensation() {
        let broker = Arc::new(MockBroker::new());
        // Leg A: place ok, filled.
        broker.script_place(PlaceOutcome::Ok);
        broker.script_status(status(FillState::Filled, Some(0.01), Some(60_000.0)));
        // Leg B: all three limits and the market fallback error out.
        for _ in 0..4 {
            broker.script_place(PlaceOutcome::Err("insufficient margin".into()));
        }
        // Compensation order on leg A: default Ok + default Filled status.

        let mgr = manager(broker.clone(), true);
        let result = mgr
            .execute_pair_entry(
                "BTCUSDT_ETHUSDT",
                "BTCUSDT",
                "ETHUSDT",
                SpreadAction::LongSpread,
                600.0,
                600.0,
            )
            .await;
        assert!(result.is_err(), "entry must fail when leg B cannot fill");

        let placed = broker.placed_orders();
        // 1 leg A + 4 failed leg B + 1 compensation.
        assert_eq!(placed.len(), 6);
        let compensation = placed.last().unwrap();
        assert_eq!(compensation.symbol, "BTCUSDT");
        assert_eq!(compensation.side, OrderSide::Sell);
        assert!(compensation.reduce_only, "compensation must be reduce-only");
        assert!((compensation.qty - 0.01).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn hold_is_not_a_valid_entry_action() {
        let broker = Arc::new(MockBroker::new());
        let mgr = manager(broker, true);
        let result = mgr
            .execute_pair_entry("X_Y", "BTCUSDT", "ETHUSDT", SpreadAction::Hold, 600.0, 600.0)
            .await;
        assert!(result.is_err());
    }

    // ---- Simulation -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn disabled_trading_simulates_with_slippage() {
        let broker = Arc::new(MockBroker::new());
        let mgr = manager(broker.clone(), false);

        let fill = mgr
            .execute_pair_entry(
                "BTCUSDT_XRPUSDT",
                "BTCUSDT",
                "XRPUSDT",
                SpreadAction::LongSpread,
                300.0,
                300.0,
            )
            .await
            .unwrap();

        assert!(fill.simulated);
        assert!(broker.placed_orders().is_empty(), "no order reaches the broker");
        // $300 @ 60k => 0.005 BTC; $300 @ $0.50 => 600 XRP.
        assert!((fill.qty_a - 0.005).abs() < 1e-12);
        assert!((fill.qty_b - 600.0).abs() < 1e-9);
        // Buy leg slips up, sell leg slips down.
        assert!((fill.entry_price_a - 60_000.0 * 1.0005).abs() < 1e-6);
        assert!((fill.entry_price_b - 0.5 * 0.9995).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_exit_mirrors_sides() {
        let broker = Arc::new(MockBroker::new());
        let mgr = manager(broker, false);
        let fill = mgr
            .execute_pair_exit(
                "BTCUSDT_ETHUSDT",
                "BTCUSDT",
                "ETHUSDT",
                PositionSide::Long,
                PositionSide::Short,
                0.01,
                0.2,
            )
            .await
            .unwrap();
        assert!(fill.simulated);
        // Closing a long sells (slips down); closing a short buys (slips up).
        assert!((fill.exit_price_a - 60_000.0 * 0.9995).abs() < 1e-6);
        assert!((fill.exit_price_b - 3_000.0 * 1.0005).abs() < 1e-6);
    }

    // ---- Quantity validation --------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn below_minimum_quantity_rejects_entry() {
        let broker = Arc::new(MockBroker::new());
        let mgr = manager(broker.clone(), false);
        // $20 of BTC at 60k rounds to 0.000.
        let result = mgr
            .execute_pair_entry(
                "BTCUSDT_ETHUSDT",
                "BTCUSDT",
                "ETHUSDT",
                SpreadAction::LongSpread,
                20.0,
                600.0,
            )
            .await;
        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("below minimum"));
    }

    #[tokio::test(start_paused = true)]
    async fn above_cap_quantity_rejects_entry() {
        let broker = Arc::new(MockBroker::new());
        let mgr = manager(broker.clone(), false);
        // $30M of XRP at $0.50 is 60M units, over the 50M cap.
        let result = mgr
            .execute_pair_entry(
                "XRPUSDT_ETHUSDT",
                "XRPUSDT",
                "ETHUSDT",
                SpreadAction::LongSpread,
                30_000_000.0,
                600.0,
            )
            .await;
        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("above cap"));
    }

    // ---- Price validation -----------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn insane_cached_price_falls_back_to_rest() {
        let broker = Arc::new(MockBroker::new());
        broker.set_price("BTCUSDT", 61_000.0);

        let market_data = Arc::new(MarketDataManager::new());
        market_data.apply_ticker("BTCUSDT", Some(5_000.0), None); // corrupt cache
        let mgr = OrderManager::new(
            broker.clone(),
            market_data,
            Arc::new(OrderRateLimiter::new()),
            true,
        );

        let price = mgr.resolve_price("BTCUSDT").await.unwrap();
        assert!((price - 61_000.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn insane_rest_price_aborts() {
        let broker = Arc::new(MockBroker::new());
        broker.set_price("BTCUSDT", 4_000.0); // still insane after re-fetch

        let market_data = Arc::new(MarketDataManager::new());
        let mgr = OrderManager::new(
            broker,
            market_data,
            Arc::new(OrderRateLimiter::new()),
            true,
        );

        assert!(mgr.resolve_price("BTCUSDT").await.is_err());
    }
}
