use polars::prelude::{DataFrame, DataType, IntoLazy, col, lit};

use crate::{
    data::OhlcvCol,
    error::{DataError, EngineError, HermesResult},
};

/// Vectorized backtest engine.
///
/// Consumes a frame whose `signal` column is already in target-position
/// form (0 = flat, 1 = long) and augments it with returns, positions, and
/// the equity curve. The shift from signal to position is the sole
/// look-ahead gate in the vector path: the signal computed at bar T is
/// held during bar T+1.
#[derive(Debug, Clone, Copy)]
pub struct VectorEngine {
    pub initial_cash: f64,
}

impl Default for VectorEngine {
    fn default() -> Self {
        Self {
            initial_cash: 100_000.0,
        }
    }
}

impl VectorEngine {
    pub fn new(initial_cash: f64) -> Self {
        Self { initial_cash }
    }

    /// Adds `market_return`, `position`, `strategy_return`, and `equity`.
    ///
    /// Invariants: `position[0] = 0`; `position[t] = signal[t-1]` for
    /// t > 0; null or NaN returns coerce to 0; `equity[t] > 0` whenever
    /// per-bar losses stay above -100%.
    pub fn run(&self, frame: DataFrame) -> HermesResult<DataFrame> {
        if !frame.schema().contains(OhlcvCol::Signal.as_str()) {
            return Err(EngineError::MissingSignal.into());
        }

        let result = frame
            .lazy()
            .with_column(
                // Close-to-close return; the first bar and any zero/null
                // denominator coerce to flat.
                (col(OhlcvCol::Close) / col(OhlcvCol::Close).shift(lit(1)) - lit(1.0))
                    .fill_nan(lit(0.0))
                    .fill_null(lit(0.0))
                    .alias(OhlcvCol::MarketReturn),
            )
            .with_column(
                col(OhlcvCol::Signal)
                    .cast(DataType::Float64)
                    .shift(lit(1))
                    .fill_null(lit(0.0))
                    .alias(OhlcvCol::Position),
            )
            .with_column(
                (col(OhlcvCol::Position) * col(OhlcvCol::MarketReturn))
                    .fill_nan(lit(0.0))
                    .fill_null(lit(0.0))
                    .alias(OhlcvCol::StrategyReturn),
            )
            .with_column(
                (lit(self.initial_cash) * (lit(1.0) + col(OhlcvCol::StrategyReturn)).cum_prod(false))
                    .alias(OhlcvCol::Equity),
            )
            .collect()
            .map_err(DataError::from)?;

        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{DateTime, NaiveDateTime};
    use polars::prelude::df;

    fn frame(closes: &[f64], signals: &[f64]) -> DataFrame {
        let timestamps: Vec<NaiveDateTime> = (0..closes.len() as i64)
            .map(|i| {
                DateTime::from_timestamp(1_704_188_100 + i * 60, 0)
                    .unwrap()
                    .naive_utc()
            })
            .collect();
        df![
            OhlcvCol::Timestamp.to_string() => timestamps,
            OhlcvCol::Close.to_string() => closes,
            OhlcvCol::Signal.to_string() => signals,
        ]
        .unwrap()
    }

    fn column(frame: &DataFrame, col: OhlcvCol) -> Vec<f64> {
        frame
            .column(col.as_str())
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect()
    }

    #[test]
    fn buy_and_hold_compounds_market_returns() {
        // S1: prices [100, 110, 121, 133.1], always-long signal.
        let engine = VectorEngine::new(100_000.0);
        let result = engine
            .run(frame(&[100.0, 110.0, 121.0, 133.1], &[1.0, 1.0, 1.0, 1.0]))
            .unwrap();

        assert_eq!(
            column(&result, OhlcvCol::Position),
            vec![0.0, 1.0, 1.0, 1.0]
        );
        let equity = column(&result, OhlcvCol::Equity);
        assert!((equity[3] - 133_100.0).abs() < 1e-6, "{equity:?}");
    }

    #[test]
    fn first_bar_is_always_flat() {
        // S2: position[0] = 0 and strategy_return[0] = 0 regardless of the
        // first market return.
        let engine = VectorEngine::default();
        let result = engine
            .run(frame(&[50.0, 55.0], &[1.0, 1.0]))
            .unwrap();

        assert_eq!(column(&result, OhlcvCol::Position)[0], 0.0);
        assert_eq!(column(&result, OhlcvCol::StrategyReturn)[0], 0.0);
        assert_eq!(column(&result, OhlcvCol::Equity)[0], 100_000.0);
    }

    #[test]
    fn flat_signal_preserves_cash() {
        let engine = VectorEngine::new(10_000.0);
        let result = engine
            .run(frame(&[100.0, 90.0, 80.0], &[0.0, 0.0, 0.0]))
            .unwrap();
        let equity = column(&result, OhlcvCol::Equity);
        assert!(equity.iter().all(|e| (*e - 10_000.0).abs() < 1e-9));
    }

    #[test]
    fn missing_signal_column_is_a_domain_error() {
        let engine = VectorEngine::default();
        let bad = df![
            OhlcvCol::Close.to_string() => [1.0, 2.0],
        ]
        .unwrap();
        let err = engine.run(bad).unwrap_err();
        assert!(matches!(
            err,
            crate::error::HermesError::Engine(EngineError::MissingSignal)
        ));
    }

    #[test]
    fn equity_stays_positive_through_drawdowns() {
        let engine = VectorEngine::new(1_000.0);
        let result = engine
            .run(frame(
                &[100.0, 60.0, 30.0, 45.0],
                &[1.0, 1.0, 1.0, 1.0],
            ))
            .unwrap();
        let equity = column(&result, OhlcvCol::Equity);
        assert!(equity.iter().all(|e| *e > 0.0), "{equity:?}");
    }

    #[test]
    fn single_row_frame_runs_and_stays_flat() {
        let engine = VectorEngine::default();
        let result = engine.run(frame(&[100.0], &[1.0])).unwrap();
        assert_eq!(result.height(), 1);
        assert_eq!(column(&result, OhlcvCol::Position), vec![0.0]);
        assert_eq!(column(&result, OhlcvCol::Equity), vec![100_000.0]);
    }
}
