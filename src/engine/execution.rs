use tracing::{debug, warn};

use crate::engine::{
    bus::{EventHandler, EventQueue},
    events::{Direction, FillEvent, MarketEvent, OrderEvent, OrderType},
};

/// Execution statistics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub orders: u64,
    pub fills: u64,
    pub partial_fills: u64,
    pub rejected: u64,
}

/// Execution handler with volume-aware order matching.
///
/// - Participation cap: an order consumes at most `max_participation_rate`
///   of the bar's volume; the remainder is dropped as a partial fill.
/// - Square-root impact: slippage grows with the filled fraction of bar
///   volume, clamped into the bar's `[low, high]` range.
/// - Per-unit commission.
pub struct VolumeAwareExecutionHandler {
    slippage: f64,
    commission_per_unit: f64,
    max_participation_rate: f64,

    last_price: f64,
    last_volume: f64,
    last_high: f64,
    last_low: f64,

    pub stats: ExecutionStats,
}

impl VolumeAwareExecutionHandler {
    pub fn new(slippage: f64, commission_per_unit: f64, max_participation_rate: f64) -> Self {
        Self {
            slippage,
            commission_per_unit,
            max_participation_rate,
            last_price: 0.0,
            last_volume: 0.0,
            last_high: 0.0,
            last_low: 0.0,
            stats: ExecutionStats::default(),
        }
    }

    /// Quantity fillable under the participation cap. With no volume data
    /// the full request fills.
    fn fill_quantity(&self, requested: f64) -> f64 {
        if self.last_volume <= 0.0 {
            return requested;
        }
        let max_fill = self.last_volume * self.max_participation_rate;
        requested.min(max_fill.max(1.0))
    }

    /// Impact-adjusted fill price, clamped into the bar's range.
    fn impacted_price(&self, base_price: f64, fill_quantity: f64, direction: Direction) -> f64 {
        let participation = if self.last_volume > 0.0 {
            fill_quantity / self.last_volume
        } else {
            0.0
        };
        let impact = if participation > 0.0 {
            self.slippage * participation.sqrt()
        } else {
            self.slippage
        };

        match direction {
            Direction::Buy => {
                let price = base_price * (1.0 + impact);
                if self.last_high > 0.0 {
                    price.min(self.last_high)
                } else {
                    price
                }
            }
            Direction::Sell => {
                let price = base_price * (1.0 - impact);
                if self.last_low > 0.0 {
                    price.max(self.last_low)
                } else {
                    price
                }
            }
        }
    }
}

impl EventHandler for VolumeAwareExecutionHandler {
    fn on_market(&mut self, event: &MarketEvent, _queue: &mut EventQueue) {
        self.last_price = event.close;
        self.last_volume = event.volume;
        self.last_high = event.high;
        self.last_low = event.low;
    }

    fn on_order(&mut self, event: &OrderEvent, queue: &mut EventQueue) {
        self.stats.orders += 1;

        let base_price = match (event.order_type, event.limit_price) {
            (OrderType::Limit, Some(limit)) => {
                // Reject limits that were never executable within the bar.
                let rejected = match event.direction {
                    Direction::Buy => limit < self.last_low,
                    Direction::Sell => limit > self.last_high,
                };
                if rejected {
                    debug!(
                        symbol = %event.symbol,
                        limit,
                        low = self.last_low,
                        high = self.last_high,
                        "Limit order rejected"
                    );
                    self.stats.rejected += 1;
                    return;
                }
                limit
            }
            _ => self.last_price,
        };

        if base_price <= 0.0 {
            warn!(symbol = %event.symbol, "Cannot fill order: no valid price");
            self.stats.rejected += 1;
            return;
        }

        let fill_quantity = self.fill_quantity(event.quantity);
        if fill_quantity < event.quantity {
            self.stats.partial_fills += 1;
            debug!(
                symbol = %event.symbol,
                requested = event.quantity,
                filled = fill_quantity,
                volume = self.last_volume,
                "Partial fill"
            );
        }

        let fill_price = self.impacted_price(base_price, fill_quantity, event.direction);
        let commission = self.commission_per_unit * fill_quantity;

        queue.publish(FillEvent {
            time: event.time,
            symbol: event.symbol.clone(),
            quantity: fill_quantity,
            direction: event.direction,
            fill_price,
            commission,
        });
        self.stats.fills += 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::events::Event;

    fn handler() -> VolumeAwareExecutionHandler {
        VolumeAwareExecutionHandler::new(0.001, 0.0, 0.10)
    }

    fn bar(close: f64, high: f64, low: f64, volume: f64) -> MarketEvent {
        MarketEvent {
            time: 1,
            symbol: "INFY".to_string(),
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    fn order(quantity: f64, direction: Direction) -> OrderEvent {
        OrderEvent {
            time: 1,
            symbol: "INFY".to_string(),
            order_type: OrderType::Market,
            limit_price: None,
            quantity,
            direction,
        }
    }

    fn limit_order(quantity: f64, direction: Direction, limit: f64) -> OrderEvent {
        OrderEvent {
            order_type: OrderType::Limit,
            limit_price: Some(limit),
            ..order(quantity, direction)
        }
    }

    fn pop_fill(queue: &mut EventQueue) -> Option<FillEvent> {
        match queue.events.pop_front() {
            Some(Event::Fill(fill)) => Some(fill),
            _ => None,
        }
    }

    #[test]
    fn market_buy_fills_with_impact_below_the_high() {
        let mut handler = handler();
        let mut queue = EventQueue::default();

        handler.on_market(&bar(100.0, 101.0, 99.0, 100_000.0), &mut queue);
        handler.on_order(&order(100.0, Direction::Buy), &mut queue);

        let fill = pop_fill(&mut queue).unwrap();
        assert_eq!(fill.quantity, 100.0);
        // participation = 100 / 100_000 = 1e-3; impact = 0.001 * sqrt(1e-3).
        let expected = 100.0 * (1.0 + 0.001 * 0.001_f64.sqrt());
        assert!((fill.fill_price - expected).abs() < 1e-9);
        assert!(fill.fill_price <= 101.0);
        assert_eq!(handler.stats.fills, 1);
    }

    #[test]
    fn participation_cap_produces_partial_fills() {
        let mut handler = handler();
        let mut queue = EventQueue::default();

        handler.on_market(&bar(100.0, 101.0, 99.0, 1_000.0), &mut queue);
        handler.on_order(&order(500.0, Direction::Buy), &mut queue);

        // Cap = 1000 * 0.10 = 100 shares.
        let fill = pop_fill(&mut queue).unwrap();
        assert_eq!(fill.quantity, 100.0);
        assert_eq!(handler.stats.partial_fills, 1);
    }

    #[test]
    fn zero_volume_fills_the_full_request() {
        let mut handler = handler();
        let mut queue = EventQueue::default();

        handler.on_market(&bar(100.0, 101.0, 99.0, 0.0), &mut queue);
        handler.on_order(&order(500.0, Direction::Buy), &mut queue);

        let fill = pop_fill(&mut queue).unwrap();
        assert_eq!(fill.quantity, 500.0);
        // No participation signal: flat base slippage applies.
        assert!((fill.fill_price - 100.0 * 1.001).abs() < 1e-9);
    }

    #[test]
    fn sell_impact_is_floored_at_the_bar_low() {
        let mut handler = VolumeAwareExecutionHandler::new(0.5, 0.0, 0.10);
        let mut queue = EventQueue::default();

        handler.on_market(&bar(100.0, 101.0, 99.0, 100.0), &mut queue);
        handler.on_order(&order(10.0, Direction::Sell), &mut queue);

        // Massive slippage clamps to the bar low.
        let fill = pop_fill(&mut queue).unwrap();
        assert_eq!(fill.fill_price, 99.0);
    }

    #[test]
    fn unexecutable_limits_are_rejected() {
        let mut handler = handler();
        let mut queue = EventQueue::default();
        handler.on_market(&bar(100.0, 101.0, 99.0, 1_000.0), &mut queue);

        handler.on_order(&limit_order(10.0, Direction::Buy, 98.0), &mut queue);
        assert!(queue.is_empty());

        handler.on_order(&limit_order(10.0, Direction::Sell, 102.0), &mut queue);
        assert!(queue.is_empty());
        assert_eq!(handler.stats.rejected, 2);
    }

    #[test]
    fn executable_limit_uses_the_limit_as_base() {
        let mut handler = VolumeAwareExecutionHandler::new(0.0, 0.0, 1.0);
        let mut queue = EventQueue::default();
        handler.on_market(&bar(100.0, 101.0, 99.0, 1_000.0), &mut queue);

        handler.on_order(&limit_order(10.0, Direction::Buy, 100.5), &mut queue);
        let fill = pop_fill(&mut queue).unwrap();
        assert_eq!(fill.fill_price, 100.5);
    }

    #[test]
    fn orders_before_any_bar_are_rejected() {
        let mut handler = handler();
        let mut queue = EventQueue::default();
        handler.on_order(&order(10.0, Direction::Buy), &mut queue);
        assert!(queue.is_empty());
        assert_eq!(handler.stats.rejected, 1);
    }

    #[test]
    fn commission_is_per_filled_unit() {
        let mut handler = VolumeAwareExecutionHandler::new(0.0, 0.05, 0.10);
        let mut queue = EventQueue::default();

        handler.on_market(&bar(100.0, 101.0, 99.0, 1_000.0), &mut queue);
        handler.on_order(&order(500.0, Direction::Buy), &mut queue);

        // Filled 100 of 500: commission applies to the filled quantity.
        let fill = pop_fill(&mut queue).unwrap();
        assert!((fill.commission - 5.0).abs() < 1e-9);
    }
}
