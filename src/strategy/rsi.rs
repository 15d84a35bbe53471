use std::collections::VecDeque;

use polars::prelude::{DataFrame, EWMOptions, Expr, IntoLazy, NULL, col, lit, when};
use polars::series::ops::NullBehavior;

use crate::{
    data::OhlcvCol,
    engine::{
        bus::{EventHandler, EventQueue},
        events::{MarketEvent, SignalEvent, SignalKind},
    },
    error::{DataError, EngineError, HermesResult},
    strategy::{Params, Strategy, latch_trigger, param_f64, param_window},
};

/// Builds the Wilder-smoothed RSI expression over the close column,
/// defaulting to 50 until the warmup window fills (flat tape reads
/// neutral).
pub(crate) fn rsi_expr(period: usize) -> Expr {
    // Wilder's smoothing is an EMA with alpha = 1/N.
    let options = EWMOptions {
        alpha: 1.0 / period as f64,
        adjust: false,
        bias: false,
        min_periods: period,
        ignore_nulls: true,
    };

    let delta = col(OhlcvCol::Close).diff(lit(1), NullBehavior::Ignore);
    let gain = delta.clone().clip(lit(0.0), lit(f64::MAX));
    let loss = delta.clip(lit(f64::MIN), lit(0.0)).abs();

    let avg_gain = gain.ewm_mean(options);
    let avg_loss = loss.ewm_mean(options);

    let rs = avg_gain / avg_loss;
    (lit(100.0) - lit(100.0) / (lit(1.0) + rs))
        .fill_nan(lit(50.0))
        .fill_null(lit(50.0))
}

/// RSI mean-reversion: long below the oversold bound, exit above the
/// overbought bound. Supports both the vectorized path and an
/// incremental event-driven mode.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    overbought: f64,
    oversold: f64,

    // Event-driven state (Wilder's smoothing, computed incrementally).
    prices: VecDeque<f64>,
    gains: VecDeque<f64>,
    losses: VecDeque<f64>,
    avg_gain: f64,
    avg_loss: f64,
    initialized: bool,
    long: bool,
}

impl Rsi {
    pub fn new(params: &Params) -> HermesResult<Self> {
        let period = param_window(params, "period", 14)?;
        let overbought = param_f64(params, "overbought", 70.0)?;
        let oversold = param_f64(params, "oversold", 30.0)?;

        if !(0.0..100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) {
            return Err(
                EngineError::InvalidParams("RSI bounds must lie in [0, 100]".to_string()).into(),
            );
        }
        if oversold >= overbought {
            return Err(EngineError::InvalidParams(format!(
                "oversold ({oversold}) must be below overbought ({overbought})"
            ))
            .into());
        }

        Ok(Self {
            period,
            overbought,
            oversold,
            prices: VecDeque::with_capacity(period + 10),
            gains: VecDeque::with_capacity(period),
            losses: VecDeque::with_capacity(period),
            avg_gain: 0.0,
            avg_loss: 0.0,
            initialized: false,
            long: false,
        })
    }

    /// Incremental RSI for the event path. Returns `None` during warmup.
    fn update_rsi(&mut self, close: f64) -> Option<f64> {
        self.prices.push_back(close);
        if self.prices.len() > self.period + 10 {
            self.prices.pop_front();
        }
        if self.prices.len() < 2 {
            return None;
        }

        let delta = self.prices[self.prices.len() - 1] - self.prices[self.prices.len() - 2];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        if !self.initialized {
            self.gains.push_back(gain);
            self.losses.push_back(loss);
            if self.gains.len() == self.period {
                // Seed with a simple average, then switch to smoothing.
                self.avg_gain = self.gains.iter().sum::<f64>() / self.period as f64;
                self.avg_loss = self.losses.iter().sum::<f64>() / self.period as f64;
                self.initialized = true;
            } else {
                return None;
            }
        } else {
            let n = self.period as f64;
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }

        if self.avg_loss == 0.0 {
            return Some(100.0);
        }
        let rs = self.avg_gain / self.avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl EventHandler for Rsi {
    fn on_market(&mut self, event: &MarketEvent, queue: &mut EventQueue) {
        let Some(rsi) = self.update_rsi(event.close) else {
            return;
        };

        let kind = if rsi < self.oversold && !self.long {
            self.long = true;
            SignalKind::Long
        } else if rsi > self.overbought && self.long {
            self.long = false;
            SignalKind::Exit
        } else {
            return;
        };

        queue.publish(SignalEvent {
            time: event.time,
            symbol: event.symbol.clone(),
            kind,
            strength: 1.0,
            strategy_id: "rsi",
        });
    }
}

impl Strategy for Rsi {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn generate_signals(&self, frame: DataFrame) -> HermesResult<DataFrame> {
        let lf = frame
            .lazy()
            .with_column(rsi_expr(self.period).alias("rsi"))
            .with_column(
                when(col("rsi").lt(lit(self.oversold)))
                    .then(lit(1.0))
                    .when(col("rsi").gt(lit(self.overbought)))
                    .then(lit(0.0))
                    .otherwise(lit(NULL))
                    .alias(OhlcvCol::SignalTrigger),
            );

        latch_trigger(lf)
            .collect()
            .map_err(|e| DataError::from(e).into())
    }
}
