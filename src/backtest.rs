use std::{collections::BTreeMap, sync::Arc};

use polars::prelude::{DataFrame, IntoLazy, col, lit};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::info;

use crate::{
    data::OhlcvCol,
    engine::{
        EventEngine, EventHandler, Portfolio, RiskParams, VectorEngine,
        VolumeAwareExecutionHandler,
        events::{Direction, MarketEvent},
        execution::ExecutionStats,
        mtf::{EXECUTION_TIMEFRAME, resample, shift_and_join},
    },
    error::{DataError, EngineError, HermesResult},
    metrics::MetricsService,
    service::MarketDataService,
    strategy::{self, Params, Strategy},
};

/// Backtest execution mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, Default,
)]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    #[default]
    Vector,
    Event,
}

/// A single-backtest request.
#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub symbol: String,
    pub strategy: String,
    pub params: Params,
    pub initial_cash: f64,
    pub mode: Mode,
    /// Analysis timeframe; values above `1m` go through the broadcaster.
    pub timeframe: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub slippage: f64,
    pub commission: f64,
    pub max_participation_rate: f64,
    pub risk: RiskParams,
}

impl BacktestRequest {
    pub fn new(symbol: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            strategy: strategy.into(),
            params: Params::new(),
            initial_cash: 100_000.0,
            mode: Mode::Vector,
            timeframe: EXECUTION_TIMEFRAME.to_string(),
            start_date: None,
            end_date: None,
            slippage: 0.001,
            commission: 0.0,
            max_participation_rate: 0.10,
            risk: RiskParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartPoint {
    pub time: i64,
    pub value: f64,
}

/// Trade marker direction for chart consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalPoint {
    pub time: i64,
    pub side: TradeSide,
    pub price: f64,
}

/// The structured result of a single backtest.
#[derive(Debug, Clone)]
pub struct BacktestResponse {
    pub symbol: String,
    pub strategy: String,
    pub metrics: BTreeMap<String, String>,
    pub equity_curve: Vec<ChartPoint>,
    pub signals: Vec<SignalPoint>,
    pub execution_stats: Option<ExecutionStats>,
}

/// Runs single backtests against loaded market data.
pub struct BacktestService {
    data: Arc<MarketDataService>,
}

impl BacktestService {
    pub fn new(data: Arc<MarketDataService>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Arc<MarketDataService> {
        &self.data
    }

    /// Loads the symbol's frame and runs the requested backtest.
    pub async fn run_backtest(&self, request: &BacktestRequest) -> HermesResult<BacktestResponse> {
        info!(
            symbol = %request.symbol,
            strategy = %request.strategy,
            mode = %request.mode,
            "Running backtest"
        );
        let frame = self
            .data
            .get_market_data(
                &[request.symbol.to_uppercase()],
                request.start_date.as_deref(),
                request.end_date.as_deref(),
            )
            .await?;
        Self::run_on_frame(request, frame)
    }

    /// The CPU-bound portion: strategy, engine, metrics. Callers that must
    /// not block an event loop run this on a worker thread.
    pub fn run_on_frame(
        request: &BacktestRequest,
        frame: DataFrame,
    ) -> HermesResult<BacktestResponse> {
        let mut strategy = strategy::build(&request.strategy, &request.params)?;

        match request.mode {
            Mode::Event => Self::run_event(request, frame, strategy.as_mut()),
            Mode::Vector => Self::run_vector(request, frame, strategy.as_ref()),
        }
    }

    fn run_vector(
        request: &BacktestRequest,
        frame: DataFrame,
        strategy: &dyn Strategy,
    ) -> HermesResult<BacktestResponse> {
        let with_signals = if request.timeframe == EXECUTION_TIMEFRAME {
            generate_checked(strategy, frame)?
        } else {
            let analysis = resample(frame.clone(), &request.timeframe)?;
            let analysis = generate_checked(strategy, analysis)?;
            shift_and_join(frame, analysis)?
        };

        let engine = VectorEngine::new(request.initial_cash);
        let result = engine.run(with_signals)?;

        let times = timestamps_secs(&result)?;
        let equity = float_column(&result, OhlcvCol::Equity.as_str())?;
        let positions = float_column(&result, OhlcvCol::Position.as_str())?;

        let exposure = if positions.is_empty() {
            0.0
        } else {
            positions.iter().filter(|p| **p != 0.0).count() as f64 / positions.len() as f64
        };

        let metrics = MetricsService::calculate(&equity, request.initial_cash, None, Some(exposure))
            .to_display_map();

        let equity_curve = times
            .iter()
            .zip(&equity)
            .map(|(time, value)| ChartPoint {
                time: *time,
                value: *value,
            })
            .collect();

        Ok(BacktestResponse {
            symbol: request.symbol.clone(),
            strategy: request.strategy.clone(),
            metrics,
            equity_curve,
            signals: extract_trades(&result)?,
            execution_stats: None,
        })
    }

    fn run_event(
        request: &BacktestRequest,
        frame: DataFrame,
        strategy: &mut dyn Strategy,
    ) -> HermesResult<BacktestResponse> {
        let events = market_events(&frame, &request.symbol)?;

        let mut portfolio = Portfolio::new(request.initial_cash, request.risk);
        let mut execution = VolumeAwareExecutionHandler::new(
            request.slippage,
            request.commission,
            request.max_participation_rate,
        );

        let mut engine = EventEngine::new();
        {
            let strategy_handler: &mut dyn EventHandler = strategy;
            engine.run(
                events,
                &mut [strategy_handler, &mut portfolio, &mut execution],
            );
        }

        let equity: Vec<f64> = portfolio.equity_history.iter().map(|(_, e)| *e).collect();
        let metrics = MetricsService::calculate(
            &equity,
            request.initial_cash,
            Some(&portfolio.fills_log),
            None,
        )
        .to_display_map();

        let equity_curve = portfolio
            .equity_history
            .iter()
            .map(|(time, value)| ChartPoint {
                time: *time,
                value: *value,
            })
            .collect();

        let signals = portfolio
            .fills_log
            .iter()
            .map(|fill| SignalPoint {
                time: fill.time,
                side: match fill.direction {
                    Direction::Buy => TradeSide::Buy,
                    Direction::Sell => TradeSide::Sell,
                },
                price: fill.price,
            })
            .collect();

        Ok(BacktestResponse {
            symbol: request.symbol.clone(),
            strategy: request.strategy.clone(),
            metrics,
            equity_curve,
            signals,
            execution_stats: Some(execution.stats),
        })
    }
}

/// Runs `generate_signals` and enforces the strategy contract: output
/// length equals input length.
fn generate_checked(strategy: &dyn Strategy, frame: DataFrame) -> HermesResult<DataFrame> {
    let input_len = frame.height();
    let result = strategy.generate_signals(frame)?;
    if result.height() != input_len {
        return Err(EngineError::Execution(format!(
            "strategy '{}' changed frame length: {} -> {}",
            strategy.name(),
            input_len,
            result.height()
        ))
        .into());
    }
    Ok(result)
}

fn timestamps_secs(frame: &DataFrame) -> HermesResult<Vec<i64>> {
    Ok(frame
        .column(OhlcvCol::Timestamp.as_str())
        .map_err(DataError::from)?
        .datetime()
        .map_err(DataError::from)?
        .phys
        .into_no_null_iter()
        .map(|micros| micros / 1_000_000)
        .collect())
}

fn float_column(frame: &DataFrame, column: &str) -> HermesResult<Vec<f64>> {
    Ok(frame
        .column(column)
        .map_err(DataError::from)?
        .f64()
        .map_err(DataError::from)?
        .iter()
        .map(|v| v.unwrap_or(0.0))
        .collect())
}

/// Materializes one [`MarketEvent`] per bar of the execution frame.
fn market_events(frame: &DataFrame, symbol: &str) -> HermesResult<Vec<MarketEvent>> {
    let times = timestamps_secs(frame)?;
    let opens = float_column(frame, OhlcvCol::Open.as_str())?;
    let highs = float_column(frame, OhlcvCol::High.as_str())?;
    let lows = float_column(frame, OhlcvCol::Low.as_str())?;
    let closes = float_column(frame, OhlcvCol::Close.as_str())?;
    let volumes = float_column(frame, OhlcvCol::Volume.as_str())?;

    Ok((0..frame.height())
        .map(|i| MarketEvent {
            time: times[i],
            symbol: symbol.to_string(),
            open: opens[i],
            high: highs[i],
            low: lows[i],
            close: closes[i],
            volume: volumes[i],
        })
        .collect())
}

/// Position changes are the executed trades: `position.diff() != 0`.
fn extract_trades(result: &DataFrame) -> HermesResult<Vec<SignalPoint>> {
    let trades = result
        .clone()
        .lazy()
        .with_column(
            (col(OhlcvCol::Position) - col(OhlcvCol::Position).shift(lit(1)).fill_null(lit(0.0)))
                .alias("trade_action"),
        )
        .filter(col("trade_action").neq(lit(0.0)))
        .select([
            col(OhlcvCol::Timestamp),
            col("trade_action"),
            col(OhlcvCol::Close),
        ])
        .collect()
        .map_err(DataError::from)?;

    let times = timestamps_secs(&trades)?;
    let actions = float_column(&trades, "trade_action")?;
    let closes = float_column(&trades, OhlcvCol::Close.as_str())?;

    Ok(times
        .iter()
        .zip(actions.iter().zip(&closes))
        .map(|(time, (action, price))| SignalPoint {
            time: *time,
            side: if *action > 0.0 {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            },
            price: *price,
        })
        .collect())
}
