use polars::prelude::{
    DataFrame, IntoLazy, RollingOptionsFixedWindow, col, lit, when,
};

use crate::{
    data::OhlcvCol,
    engine::bus::EventHandler,
    error::{DataError, EngineError, HermesResult},
    strategy::{Params, Strategy, param_window},
};

/// Simple moving average crossover: long while the fast SMA is above the
/// slow SMA, flat otherwise. Emits target positions directly.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    fast_period: usize,
    slow_period: usize,
}

impl SmaCrossover {
    pub fn new(params: &Params) -> HermesResult<Self> {
        let fast_period = param_window(params, "fast_period", 50)?;
        let slow_period = param_window(params, "slow_period", 200)?;
        if fast_period >= slow_period {
            return Err(EngineError::InvalidParams(format!(
                "fast_period ({fast_period}) must be below slow_period ({slow_period})"
            ))
            .into());
        }
        Ok(Self {
            fast_period,
            slow_period,
        })
    }

    fn rolling(window: usize) -> RollingOptionsFixedWindow {
        RollingOptionsFixedWindow {
            window_size: window,
            min_periods: window,
            ..Default::default()
        }
    }
}

impl EventHandler for SmaCrossover {}

impl Strategy for SmaCrossover {
    fn name(&self) -> &'static str {
        "sma_crossover"
    }

    fn generate_signals(&self, frame: DataFrame) -> HermesResult<DataFrame> {
        frame
            .lazy()
            .with_columns([
                col(OhlcvCol::Close)
                    .rolling_mean(Self::rolling(self.fast_period))
                    .alias("sma_fast"),
                col(OhlcvCol::Close)
                    .rolling_mean(Self::rolling(self.slow_period))
                    .alias("sma_slow"),
            ])
            .with_column(
                when(col("sma_fast").gt(col("sma_slow")))
                    .then(lit(1.0))
                    .otherwise(lit(0.0))
                    .alias(OhlcvCol::Signal),
            )
            .collect()
            .map_err(|e| DataError::from(e).into())
    }
}
