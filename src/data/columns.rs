use polars::prelude::{DataType, Field, PlSmallStr, Schema, SchemaRef, TimeUnit};
use std::sync::Arc;
use strum::{Display, EnumString, IntoStaticStr};

/// The standardized column vocabulary for all Hermes market data frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum OhlcvCol {
    // ========================================================================
    // Identity & Time
    // ========================================================================
    /// The primary index timestamp (bar open time, naive wall clock).
    Timestamp,
    /// Instrument symbol tag (added when frames from several symbols stack).
    Symbol,

    // ========================================================================
    // Market Data
    // ========================================================================
    Open,
    High,
    Low,
    Close,
    Volume,
    /// Open interest. Optional; the broker reports it for derivatives only.
    Oi,

    // ========================================================================
    // Derived (strategy & engine output)
    // ========================================================================
    /// Target position during the bar: 0 = flat, 1 = long.
    Signal,
    /// Sparse strategy trigger before forward-fill latching.
    SignalTrigger,
    /// Signal shifted by one bar; what is actually held during the bar.
    Position,
    /// Close-to-close simple return.
    MarketReturn,
    /// `position * market_return`.
    StrategyReturn,
    /// Cumulative-product wealth path.
    Equity,
}

impl From<OhlcvCol> for PlSmallStr {
    fn from(value: OhlcvCol) -> Self {
        value.as_str().into()
    }
}

impl OhlcvCol {
    pub fn name(&self) -> PlSmallStr {
        (*self).into()
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Self::Timestamp => DataType::Datetime(TimeUnit::Microseconds, None),
            Self::Symbol => DataType::String,
            _ => DataType::Float64,
        }
    }
}

/// Columns every stored OHLCV frame carries, in storage order.
pub const BASE_COLS: [OhlcvCol; 7] = [
    OhlcvCol::Timestamp,
    OhlcvCol::Open,
    OhlcvCol::High,
    OhlcvCol::Low,
    OhlcvCol::Close,
    OhlcvCol::Volume,
    OhlcvCol::Oi,
];

pub fn ohlcv_schema() -> SchemaRef {
    let fields: Vec<Field> = BASE_COLS
        .iter()
        .map(|c| Field::new(c.name(), c.dtype()))
        .collect();
    Arc::new(Schema::from_iter(fields))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vocabulary_serializes_snake_case() {
        assert_eq!(OhlcvCol::Timestamp.as_str(), "timestamp");
        assert_eq!(OhlcvCol::MarketReturn.as_str(), "market_return");
        assert_eq!(OhlcvCol::SignalTrigger.as_str(), "signal_trigger");
        assert_eq!("close".parse::<OhlcvCol>().unwrap(), OhlcvCol::Close);
    }

    #[test]
    fn schema_types_timestamp_as_naive_datetime() {
        let schema = ohlcv_schema();
        assert_eq!(
            schema.get("timestamp"),
            Some(&DataType::Datetime(TimeUnit::Microseconds, None))
        );
        assert_eq!(schema.get("close"), Some(&DataType::Float64));
        assert_eq!(schema.len(), 7);
    }
}
