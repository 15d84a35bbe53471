pub mod bollinger;
pub mod macd;
pub mod mtf_trend;
pub mod rsi;
pub mod sma_cross;

use polars::prelude::{DataFrame, FillNullStrategy, LazyFrame, col, lit};
use serde_json::Value;

use crate::{
    data::OhlcvCol,
    engine::bus::EventHandler,
    error::{EngineError, HermesResult},
};

pub use bollinger::BollingerBands;
pub use macd::Macd;
pub use mtf_trend::MtfTrendFollowing;
pub use rsi::Rsi;
pub use sma_cross::SmaCrossover;

/// Free-form strategy parameters, as supplied by API callers.
pub type Params = serde_json::Map<String, Value>;

/// A signal-generation strategy.
///
/// `generate_signals` is the vectorized contract: output length equals
/// input length and the emitted `signal` column is in target-position
/// form with values in {0, 1}. The [`EventHandler`] supertrait carries
/// the optional event-driven implementation; strategies without one
/// inherit the no-op handlers.
pub trait Strategy: EventHandler + Send {
    fn name(&self) -> &'static str;

    fn generate_signals(&self, frame: DataFrame) -> HermesResult<DataFrame>;
}

// ================================================================================================
// Registry
// ================================================================================================

/// Names accepted by [`build`], in registration order.
pub const STRATEGY_NAMES: [&str; 5] = [
    "sma_crossover",
    "rsi",
    "macd",
    "bollinger",
    "mtf_trend_following",
];

/// Build-time strategy registry: maps a strategy name to a constructed
/// instance. Unknown names list the available set in the error.
pub fn build(name: &str, params: &Params) -> HermesResult<Box<dyn Strategy>> {
    match name {
        "sma_crossover" => Ok(Box::new(SmaCrossover::new(params)?)),
        "rsi" => Ok(Box::new(Rsi::new(params)?)),
        "macd" => Ok(Box::new(Macd::new(params)?)),
        "bollinger" => Ok(Box::new(BollingerBands::new(params)?)),
        "mtf_trend_following" => Ok(Box::new(MtfTrendFollowing::new(params)?)),
        other => Err(EngineError::UnknownStrategy(
            other.to_string(),
            STRATEGY_NAMES.join(", "),
        )
        .into()),
    }
}

// ================================================================================================
// Shared helpers
// ================================================================================================

/// Latches a sparse {1, 0, null} trigger column into target-position
/// form: forward-fill carries the last decision, leading nulls go flat.
pub(crate) fn latch_trigger(lf: LazyFrame) -> LazyFrame {
    lf.with_column(
        col(OhlcvCol::SignalTrigger)
            .fill_null_with_strategy(FillNullStrategy::Forward(None))
            .fill_null(lit(0.0))
            .alias(OhlcvCol::Signal),
    )
}

pub(crate) fn param_f64(params: &Params, key: &str, default: f64) -> HermesResult<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| {
            EngineError::InvalidParams(format!("'{key}' must be a number, got {value}")).into()
        }),
    }
}

pub(crate) fn param_window(params: &Params, key: &str, default: usize) -> HermesResult<usize> {
    let value = param_f64(params, key, default as f64)?;
    if value < 1.0 || value.fract() != 0.0 {
        return Err(
            EngineError::InvalidParams(format!("'{key}' must be a positive integer")).into(),
        );
    }
    Ok(value as usize)
}

#[cfg(test)]
pub(crate) mod test_frames {
    use chrono::{DateTime, NaiveDateTime};
    use polars::prelude::{DataFrame, df};

    use crate::data::OhlcvCol;

    /// A minute OHLCV frame tracking the given close path.
    pub fn ohlcv(closes: &[f64]) -> DataFrame {
        let timestamps: Vec<NaiveDateTime> = (0..closes.len() as i64)
            .map(|i| {
                DateTime::from_timestamp(1_704_188_100 + i * 60, 0)
                    .unwrap()
                    .naive_utc()
            })
            .collect();
        df![
            OhlcvCol::Timestamp.to_string() => timestamps,
            OhlcvCol::Open.to_string() => closes.to_vec(),
            OhlcvCol::High.to_string() => closes.to_vec(),
            OhlcvCol::Low.to_string() => closes.to_vec(),
            OhlcvCol::Close.to_string() => closes.to_vec(),
            OhlcvCol::Volume.to_string() => vec![1000.0; closes.len()],
        ]
        .unwrap()
    }

    /// The emitted signal column as plain floats.
    pub fn signals(frame: &DataFrame) -> Vec<f64> {
        frame
            .column(OhlcvCol::Signal.as_str())
            .unwrap()
            .cast(&polars::prelude::DataType::Float64)
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_builds_every_listed_strategy() {
        for name in STRATEGY_NAMES {
            assert!(build(name, &Params::new()).is_ok(), "{name}");
        }
    }

    #[test]
    fn unknown_names_report_the_available_set() {
        let err = build("momentum", &Params::new()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("momentum"));
        assert!(message.contains("sma_crossover"));
    }

    #[test]
    fn param_validation_rejects_wrong_types() {
        let mut params = Params::new();
        params.insert("period".to_string(), Value::String("fast".to_string()));
        assert!(param_f64(&params, "period", 14.0).is_err());
        assert!(param_window(&params, "period", 14).is_err());

        params.insert("period".to_string(), Value::from(-3));
        assert!(param_window(&params, "period", 14).is_err());

        params.insert("period".to_string(), Value::from(21));
        assert_eq!(param_window(&params, "period", 14).unwrap(), 21);
    }
}
