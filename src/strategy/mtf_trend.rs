use polars::prelude::{
    AsOfOptions, AsofStrategy, DataFrame, IntoLazy, JoinArgs, JoinType, NULL,
    RollingOptionsFixedWindow, SortMultipleOptions, col, lit, when,
};

use crate::{
    data::OhlcvCol,
    engine::{bus::EventHandler, mtf::resample},
    error::{DataError, HermesResult},
    strategy::{Params, Strategy, latch_trigger, param_window, rsi::rsi_expr},
};

const TREND_COL: &str = "bullish_trend_htf";

/// Multi-timeframe trend following: resamples to daily bars, gates on a
/// daily SMA-50 > SMA-200 trend, and buys minute RSI dips only while the
/// daily trend is bullish. Exits on minute RSI strength.
#[derive(Debug, Clone)]
pub struct MtfTrendFollowing {
    trend_fast: usize,
    trend_slow: usize,
    rsi_period: usize,
}

impl MtfTrendFollowing {
    pub fn new(params: &Params) -> HermesResult<Self> {
        Ok(Self {
            trend_fast: param_window(params, "trend_fast", 50)?,
            trend_slow: param_window(params, "trend_slow", 200)?,
            rsi_period: param_window(params, "rsi_period", 14)?,
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

impl EventHandler for MtfTrendFollowing {}

impl Strategy for MtfTrendFollowing {
    fn name(&self) -> &'static str {
        "mtf_trend_following"
    }

    fn generate_signals(&self, frame: DataFrame) -> HermesResult<DataFrame> {
        // Daily trend regime.
        let daily = resample(frame.clone(), "1d")?;
        let daily_trend = daily
            .lazy()
            .with_columns([
                col(OhlcvCol::Close)
                    .rolling_mean(Self::rolling(self.trend_fast))
                    .alias("sma_fast"),
                col(OhlcvCol::Close)
                    .rolling_mean(Self::rolling(self.trend_slow))
                    .alias("sma_slow"),
            ])
            .select([
                col(OhlcvCol::Timestamp),
                col("sma_fast").gt(col("sma_slow")).alias(TREND_COL),
            ]);

        // Forward-fill the running daily regime onto the minutes.
        let lf = frame
            .lazy()
            .sort([OhlcvCol::Timestamp.as_str()], SortMultipleOptions::default())
            .join(
                daily_trend.sort([OhlcvCol::Timestamp.as_str()], SortMultipleOptions::default()),
                [col(OhlcvCol::Timestamp)],
                [col(OhlcvCol::Timestamp)],
                JoinArgs::new(JoinType::AsOf(Box::new(AsOfOptions {
                    strategy: AsofStrategy::Backward,
                    ..Default::default()
                }))),
            )
            .with_column(rsi_expr(self.rsi_period).alias("rsi"))
            .with_column(
                when(col("rsi").lt(lit(30.0)).and(col(TREND_COL)))
                    .then(lit(1.0))
                    .when(col("rsi").gt(lit(70.0)))
                    .then(lit(0.0))
                    .otherwise(lit(NULL))
                    .alias(OhlcvCol::SignalTrigger),
            );

        latch_trigger(lf)
            .collect()
            .map_err(|e| DataError::from(e).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::strategy::test_frames::{ohlcv, signals};
    use serde_json::json;

    fn small_windows() -> MtfTrendFollowing {
        let mut params = Params::new();
        params.insert("trend_fast".to_string(), json!(2));
        params.insert("trend_slow".to_string(), json!(4));
        params.insert("rsi_period".to_string(), json!(5));
        MtfTrendFollowing::new(&params).unwrap()
    }

    #[test]
    fn output_length_matches_input() {
        let strategy = small_windows();
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + (i % 11) as f64).collect();
        let result = strategy.generate_signals(ohlcv(&closes)).unwrap();
        assert_eq!(result.height(), 120);
        assert!(signals(&result).iter().all(|s| *s == 0.0 || *s == 1.0));
    }

    #[test]
    fn bearish_regime_blocks_dip_buying() {
        let strategy = small_windows();
        // Monotone decline: minute RSI is deeply oversold, but the daily
        // trend can never be bullish.
        let closes: Vec<f64> = (0..120).map(|i| 500.0 - 2.0 * i as f64).collect();
        let result = strategy.generate_signals(ohlcv(&closes)).unwrap();
        assert!(signals(&result).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn zero_volume_frame_does_not_divide_by_zero() {
        let strategy = small_windows();
        let mut frame = ohlcv(&[100.0; 60]);
        frame
            .replace(
                OhlcvCol::Volume.as_str(),
                polars::prelude::Series::new(OhlcvCol::Volume.name(), vec![0.0; 60]),
            )
            .unwrap();
        let result = strategy.generate_signals(frame).unwrap();
        assert_eq!(result.height(), 60);
    }
}
