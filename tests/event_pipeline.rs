//! End-to-end event path: strategy, risk-aware portfolio, and
//! volume-aware execution wired through the serial event engine.

use hermes::engine::events::{Direction, MarketEvent};
use hermes::engine::{
    EventEngine, EventHandler, Portfolio, RiskParams, VolumeAwareExecutionHandler,
};
use hermes::strategy::{self, Params};
use serde_json::json;

fn bars(closes: &[f64]) -> Vec<MarketEvent> {
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| MarketEvent {
            time: 60 * i as i64,
            symbol: "INFY".to_string(),
            open: *close,
            high: close * 1.001,
            low: close * 0.999,
            close: *close,
            volume: 50_000.0,
        })
        .collect()
}

fn rsi_strategy() -> Box<dyn strategy::Strategy> {
    let mut params = Params::new();
    params.insert("period".to_string(), json!(5));
    strategy::build("rsi", &params).unwrap()
}

#[test]
fn dip_and_rally_round_trips_through_the_portfolio() {
    // A short decline drives RSI oversold (LONG), the rally drives it
    // overbought (EXIT). The dip stays well inside the 5% stop.
    let mut closes: Vec<f64> = (0..12).map(|i| 100.0 * 0.996_f64.powi(i)).collect();
    closes.extend((1..=40).map(|i| 95.69 * 1.004_f64.powi(i)));

    let mut strategy = rsi_strategy();
    let mut portfolio = Portfolio::new(100_000.0, RiskParams::default());
    let mut execution = VolumeAwareExecutionHandler::new(0.0, 0.0, 0.10);

    let events = bars(&closes);
    let total_bars = events.len();

    let mut engine = EventEngine::new();
    {
        let strategy_handler: &mut dyn EventHandler = strategy.as_mut();
        engine.run(events, &mut [strategy_handler, &mut portfolio, &mut execution]);
    }

    // One buy and one sell round trip.
    let buys = portfolio
        .fills_log
        .iter()
        .filter(|f| f.direction == Direction::Buy)
        .count();
    let sells = portfolio
        .fills_log
        .iter()
        .filter(|f| f.direction == Direction::Sell)
        .count();
    assert_eq!(buys, 1, "fills: {:?}", portfolio.fills_log);
    assert_eq!(sells, 1, "fills: {:?}", portfolio.fills_log);

    // The position is closed and the round trip was profitable.
    assert!(!portfolio.position("INFY").unwrap().is_open());
    assert!(portfolio.position("INFY").unwrap().realized_pnl > 0.0);
    assert!(portfolio.cash > 100_000.0);

    // Mark-to-market snapshot on every bar.
    assert_eq!(portfolio.equity_history.len(), total_bars);

    assert_eq!(execution.stats.orders, 2);
    assert_eq!(execution.stats.fills, 2);
    assert_eq!(execution.stats.rejected, 0);
}

#[test]
fn crash_through_the_stop_loss_liquidates() {
    // A long slide: the RSI long enters early and the continuing decline
    // breaches the 5% stop.
    let mut closes: Vec<f64> = (0..30).map(|i| 100.0 * 0.996_f64.powi(i)).collect();
    closes.extend([80.0, 80.0, 80.0]);

    let mut strategy = rsi_strategy();
    let mut portfolio = Portfolio::new(100_000.0, RiskParams::default());
    let mut execution = VolumeAwareExecutionHandler::new(0.0, 0.0, 0.10);

    let mut engine = EventEngine::new();
    {
        let strategy_handler: &mut dyn EventHandler = strategy.as_mut();
        engine.run(
            bars(&closes),
            &mut [strategy_handler, &mut portfolio, &mut execution],
        );
    }

    let position = portfolio.position("INFY").expect("position was traded");
    assert!(!position.is_open(), "stop-loss must flatten the position");
    assert!(position.realized_pnl < 0.0);
}

#[test]
fn participation_cap_splits_large_entries() {
    // Thin volume: fixed 10-share orders cap at 10% of 50 shares -> 5,
    // floored at 1; the engine partially fills and counts it.
    let mut closes: Vec<f64> = (0..30).map(|i| 100.0 * 0.996_f64.powi(i)).collect();
    closes.extend((0..10).map(|i| 88.7 * 1.004_f64.powi(i)));

    let events: Vec<MarketEvent> = bars(&closes)
        .into_iter()
        .map(|mut e| {
            e.volume = 50.0;
            e
        })
        .collect();

    let mut strategy = rsi_strategy();
    let mut portfolio = Portfolio::new(100_000.0, RiskParams::default());
    let mut execution = VolumeAwareExecutionHandler::new(0.0, 0.0, 0.10);

    let mut engine = EventEngine::new();
    {
        let strategy_handler: &mut dyn EventHandler = strategy.as_mut();
        engine.run(events, &mut [strategy_handler, &mut portfolio, &mut execution]);
    }

    assert!(execution.stats.partial_fills >= 1);
    let buy = portfolio
        .fills_log
        .iter()
        .find(|f| f.direction == Direction::Buy)
        .expect("a partial buy fill");
    assert_eq!(buy.quantity, 5.0);
}
