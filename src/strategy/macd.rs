use polars::prelude::{DataFrame, EWMOptions, IntoLazy, NULL, col, lit, when};

use crate::{
    data::OhlcvCol,
    engine::bus::EventHandler,
    error::{DataError, HermesResult},
    strategy::{Params, Strategy, latch_trigger, param_window},
};

/// MACD crossover: long while the MACD line is above its signal line,
/// flat while below, latched through the equality region.
#[derive(Debug, Clone)]
pub struct Macd {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
}

impl Macd {
    pub fn new(params: &Params) -> HermesResult<Self> {
        Ok(Self {
            fast_period: param_window(params, "fast_period", 12)?,
            slow_period: param_window(params, "slow_period", 26)?,
            signal_period: param_window(params, "signal_period", 9)?,
        })
    }

    fn ema(span: usize) -> EWMOptions {
        EWMOptions {
            // Standard EMA: alpha = 2 / (span + 1).
            alpha: 2.0 / (span as f64 + 1.0),
            adjust: false,
            bias: false,
            min_periods: 1,
            ignore_nulls: true,
        }
    }
}

impl EventHandler for Macd {}

impl Strategy for Macd {
    fn name(&self) -> &'static str {
        "macd"
    }

    fn generate_signals(&self, frame: DataFrame) -> HermesResult<DataFrame> {
        let lf = frame
            .lazy()
            .with_columns([
                col(OhlcvCol::Close)
                    .ewm_mean(Self::ema(self.fast_period))
                    .alias("ema_fast"),
                col(OhlcvCol::Close)
                    .ewm_mean(Self::ema(self.slow_period))
                    .alias("ema_slow"),
            ])
            .with_column((col("ema_fast") - col("ema_slow")).alias("macd_line"))
            .with_column(
                col("macd_line")
                    .ewm_mean(Self::ema(self.signal_period))
                    .alias("signal_line"),
            )
            .with_column(
                when(col("macd_line").gt(col("signal_line")))
                    .then(lit(1.0))
                    .when(col("macd_line").lt(col("signal_line")))
                    .then(lit(0.0))
                    .otherwise(lit(NULL))
                    .alias(OhlcvCol::SignalTrigger),
            );

        latch_trigger(lf)
            .collect()
            .map_err(|e| DataError::from(e).into())
    }
}
