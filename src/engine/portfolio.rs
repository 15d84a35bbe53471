use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{info, warn};

use crate::engine::{
    bus::{EventHandler, EventQueue},
    events::{Direction, FillEvent, MarketEvent, OrderEvent, OrderType, SignalEvent, SignalKind},
};

/// Position sizing method.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, Default,
)]
#[strum(serialize_all = "snake_case")]
pub enum SizingMethod {
    #[default]
    Fixed,
    PctEquity,
    AtrBased,
}

/// Risk management parameters for position sizing and stops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskParams {
    pub sizing_method: SizingMethod,
    pub fixed_quantity: f64,
    /// Fraction of equity allocated per trade.
    pub pct_equity: f64,
    pub atr_multiplier: f64,
    /// Maximum portfolio allocation for a single position.
    pub max_position_pct: f64,
    /// Hard stop as a fraction of entry price.
    pub stop_loss_pct: f64,
    pub allow_short: bool,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            sizing_method: SizingMethod::Fixed,
            fixed_quantity: 10.0,
            pct_equity: 0.02,
            atr_multiplier: 1.5,
            max_position_pct: 0.25,
            stop_loss_pct: 0.05,
            allow_short: false,
        }
    }
}

/// One open position.
#[derive(Debug, Clone, Default)]
pub struct Position {
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub total_cost: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.quantity != 0.0
    }
}

/// A row of the fills ledger.
#[derive(Debug, Clone)]
pub struct FillRecord {
    pub time: i64,
    pub symbol: String,
    pub direction: Direction,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub cash_after: f64,
    pub equity_after: f64,
}

/// Risk-aware portfolio for the event-driven engine.
///
/// Translates signals into sized orders, updates position and cash state
/// on fills, tracks last prices for mark-to-market, snapshots equity per
/// bar, and enforces the max-position cap and the hard stop-loss.
pub struct Portfolio {
    pub initial_cash: f64,
    pub cash: f64,
    risk: RiskParams,
    positions: HashMap<String, Position>,
    last_prices: HashMap<String, f64>,
    pub equity_history: Vec<(i64, f64)>,
    pub fills_log: Vec<FillRecord>,
}

impl Portfolio {
    pub fn new(initial_cash: f64, risk: RiskParams) -> Self {
        info!(initial_cash, sizing = %risk.sizing_method, "Portfolio initialized");
        Self {
            initial_cash,
            cash: initial_cash,
            risk,
            positions: HashMap::new(),
            last_prices: HashMap::new(),
            equity_history: Vec::new(),
            fills_log: Vec::new(),
        }
    }

    /// Total equity: cash plus the market value of every position at the
    /// last seen price (entry price before the first bar arrives).
    pub fn equity(&self) -> f64 {
        let positions: f64 = self
            .positions
            .iter()
            .map(|(symbol, pos)| {
                let price = self
                    .last_prices
                    .get(symbol)
                    .copied()
                    .unwrap_or(pos.avg_entry_price);
                pos.quantity * price
            })
            .sum();
        self.cash + positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    fn sized_quantity(&self, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        match self.risk.sizing_method {
            SizingMethod::Fixed => self.risk.fixed_quantity,
            SizingMethod::PctEquity => {
                let allocation = self.equity() * self.risk.pct_equity;
                (allocation / price).round().max(1.0)
            }
            SizingMethod::AtrBased => {
                // stop_loss_pct proxies the expected per-share risk until
                // the strategy supplies a live ATR.
                let risk_budget = self.equity() * self.risk.pct_equity;
                let risk_per_share = price * self.risk.stop_loss_pct;
                if risk_per_share <= 0.0 {
                    return 0.0;
                }
                (risk_budget / risk_per_share).round().max(1.0)
            }
        }
    }

    /// Caps `quantity` so the position's market value stays within
    /// `max_position_pct` of equity.
    fn cap_to_position_limit(&self, symbol: &str, quantity: f64, price: f64) -> f64 {
        let max_allocation = self.equity() * self.risk.max_position_pct;
        let current_value = self
            .positions
            .get(symbol)
            .map(|p| p.quantity * price)
            .unwrap_or(0.0);
        let headroom = max_allocation - current_value;

        if headroom <= 0.0 {
            warn!(symbol, current_value, max_allocation, "Position limit reached");
            return 0.0;
        }
        quantity.min((headroom / price).round().max(1.0))
    }

    fn market_order(
        time: i64,
        symbol: &str,
        quantity: f64,
        direction: Direction,
    ) -> OrderEvent {
        OrderEvent {
            time,
            symbol: symbol.to_string(),
            order_type: OrderType::Market,
            limit_price: None,
            quantity,
            direction,
        }
    }

    fn enter(&self, event: &SignalEvent, direction: Direction) -> Option<OrderEvent> {
        let price = self.last_prices.get(&event.symbol).copied().unwrap_or(0.0);
        if price <= 0.0 {
            return None;
        }

        let mut quantity = self.sized_quantity(price);
        quantity = self.cap_to_position_limit(&event.symbol, quantity, price);
        if quantity <= 0.0 {
            return None;
        }

        // Cap again by available cash.
        if quantity * price > self.cash {
            quantity = (self.cash / price).round() - 1.0;
            if quantity <= 0.0 {
                warn!(symbol = %event.symbol, "Insufficient cash");
                return None;
            }
        }

        Some(Self::market_order(event.time, &event.symbol, quantity, direction))
    }
}

impl EventHandler for Portfolio {
    fn on_market(&mut self, event: &MarketEvent, queue: &mut EventQueue) {
        self.last_prices.insert(event.symbol.clone(), event.close);

        // Hard stop: liquidate the whole position when the drawdown from
        // entry breaches the configured threshold.
        if let Some(position) = self.positions.get(&event.symbol)
            && position.is_open()
            && position.quantity > 0.0
            && position.avg_entry_price > 0.0
        {
            let loss_pct = (event.close - position.avg_entry_price) / position.avg_entry_price;
            if loss_pct <= -self.risk.stop_loss_pct {
                info!(
                    symbol = %event.symbol,
                    loss_pct,
                    threshold = -self.risk.stop_loss_pct,
                    "Stop-loss triggered"
                );
                queue.publish(Self::market_order(
                    event.time,
                    &event.symbol,
                    position.quantity,
                    Direction::Sell,
                ));
            }
        }

        self.equity_history.push((event.time, self.equity()));
    }

    fn on_signal(&mut self, event: &SignalEvent, queue: &mut EventQueue) {
        let open = self
            .positions
            .get(&event.symbol)
            .is_some_and(Position::is_open);

        let order = match event.kind {
            SignalKind::Long if !open => self.enter(event, Direction::Buy),
            SignalKind::Exit if open => {
                let quantity = self.positions[&event.symbol].quantity;
                (quantity > 0.0)
                    .then(|| Self::market_order(event.time, &event.symbol, quantity, Direction::Sell))
            }
            SignalKind::Short if !open && self.risk.allow_short => {
                self.enter(event, Direction::Sell)
            }
            _ => None,
        };

        if let Some(order) = order {
            queue.publish(order);
        }
    }

    fn on_fill(&mut self, event: &FillEvent, _queue: &mut EventQueue) {
        let position = self.positions.entry(event.symbol.clone()).or_default();

        match event.direction {
            Direction::Buy => {
                let total_cost = event.quantity * event.fill_price + event.commission;
                self.cash -= total_cost;

                let new_quantity = position.quantity + event.quantity;
                if new_quantity > 0.0 {
                    position.avg_entry_price = (position.avg_entry_price * position.quantity
                        + event.fill_price * event.quantity)
                        / new_quantity;
                }
                position.quantity = new_quantity;
                position.total_cost += total_cost;
            }
            Direction::Sell => {
                self.cash += event.quantity * event.fill_price - event.commission;

                let pnl = (event.fill_price - position.avg_entry_price) * event.quantity
                    - event.commission;
                position.realized_pnl += pnl;
                position.quantity -= event.quantity;

                if position.quantity <= 0.0 {
                    position.quantity = 0.0;
                    position.avg_entry_price = 0.0;
                }
            }
        }

        let record = FillRecord {
            time: event.time,
            symbol: event.symbol.clone(),
            direction: event.direction,
            quantity: event.quantity,
            price: event.fill_price,
            commission: event.commission,
            cash_after: self.cash,
            equity_after: self.equity(),
        };
        self.fills_log.push(record);
    }
}
