use polars::prelude::{
    DataFrame, IntoLazy, NULL, RollingOptionsFixedWindow, col, lit, when,
};

use crate::{
    data::OhlcvCol,
    engine::bus::EventHandler,
    error::{DataError, EngineError, HermesResult},
    strategy::{Params, Strategy, latch_trigger, param_f64, param_window},
};

/// Bollinger band mean reversion: long when the close pierces the lower
/// band, flat when it pierces the upper band, latched in between.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    std_dev: f64,
}

impl BollingerBands {
    pub fn new(params: &Params) -> HermesResult<Self> {
        let period = param_window(params, "period", 20)?;
        let std_dev = param_f64(params, "std_dev", 2.0)?;
        if std_dev <= 0.0 {
            return Err(EngineError::InvalidParams("'std_dev' must be positive".to_string()).into());
        }
        Ok(Self { period, std_dev })
    }

    fn rolling(&self) -> RollingOptionsFixedWindow {
        RollingOptionsFixedWindow {
            window_size: self.period,
            min_periods: self.period,
            ..Default::default()
        }
    }
}

impl EventHandler for BollingerBands {}

impl Strategy for BollingerBands {
    fn name(&self) -> &'static str {
        "bollinger"
    }

    fn generate_signals(&self, frame: DataFrame) -> HermesResult<DataFrame> {
        let lf = frame
            .lazy()
            .with_columns([
                col(OhlcvCol::Close)
                    .rolling_mean(self.rolling())
                    .alias("bb_mid"),
                col(OhlcvCol::Close)
                    .rolling_std(self.rolling())
                    .alias("bb_std"),
            ])
            .with_columns([
                (col("bb_mid") + col("bb_std") * lit(self.std_dev)).alias("bb_upper"),
                (col("bb_mid") - col("bb_std") * lit(self.std_dev)).alias("bb_lower"),
            ])
            .with_column(
                when(col(OhlcvCol::Close).lt(col("bb_lower")))
                    .then(lit(1.0))
                    .when(col(OhlcvCol::Close).gt(col("bb_upper")))
                    .then(lit(0.0))
                    .otherwise(lit(NULL))
                    .alias(OhlcvCol::SignalTrigger),
            );

        latch_trigger(lf)
            .collect()
            .map_err(|e| DataError::from(e).into())
    }
}
