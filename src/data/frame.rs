use chrono::{DateTime, NaiveDateTime};
use polars::prelude::{
    DataFrame, IntoLazy, LazyFrame, NonExistent, SortMultipleOptions, TimeUnit, col, lit,
};

use crate::{
    data::columns::OhlcvCol,
    error::{DataError, HermesResult},
};

/// Strips timezone information so every downstream consumer sees naive
/// wall-clock timestamps. Broker data arrives offset-aware; stored parquet
/// may carry UTC metadata depending on the writer.
pub fn normalize_timestamps(lf: LazyFrame) -> LazyFrame {
    lf.with_column(col(OhlcvCol::Timestamp).dt().replace_time_zone(
        None,
        lit("raise"),
        NonExistent::Raise,
    ))
}

/// Ingress guard: drops rows violating the OHLC invariants.
///
/// Invariants enforced: all OHLC strictly positive, `high >= low`,
/// `low <= open <= high`, `low <= close <= high`, no nulls in OHLC.
/// Rows failing any check are filtered; the load succeeds with reduced
/// cardinality.
pub fn data_guard(lf: LazyFrame) -> LazyFrame {
    lf.filter(
        col(OhlcvCol::Close)
            .gt(lit(0.0))
            .and(col(OhlcvCol::Open).gt(lit(0.0)))
            .and(col(OhlcvCol::High).gt(lit(0.0)))
            .and(col(OhlcvCol::Low).gt(lit(0.0))),
    )
    .filter(
        col(OhlcvCol::High)
            .gt_eq(col(OhlcvCol::Low))
            .and(col(OhlcvCol::High).gt_eq(col(OhlcvCol::Open)))
            .and(col(OhlcvCol::High).gt_eq(col(OhlcvCol::Close)))
            .and(col(OhlcvCol::Low).lt_eq(col(OhlcvCol::Open)))
            .and(col(OhlcvCol::Low).lt_eq(col(OhlcvCol::Close))),
    )
    .filter(
        col(OhlcvCol::Open)
            .is_not_null()
            .and(col(OhlcvCol::High).is_not_null())
            .and(col(OhlcvCol::Low).is_not_null())
            .and(col(OhlcvCol::Close).is_not_null()),
    )
}

/// Canonical ordering before any downstream use: `(timestamp, symbol)`.
pub fn sort_canonical(lf: LazyFrame, has_symbol: bool) -> LazyFrame {
    if has_symbol {
        lf.sort(
            [OhlcvCol::Timestamp.as_str(), OhlcvCol::Symbol.as_str()],
            SortMultipleOptions::default(),
        )
    } else {
        lf.sort([OhlcvCol::Timestamp.as_str()], SortMultipleOptions::default())
    }
}

/// Returns the maximum stored timestamp of a frame, or `None` when empty.
pub fn max_timestamp(df: &DataFrame) -> HermesResult<Option<NaiveDateTime>> {
    if df.height() == 0 {
        return Ok(None);
    }
    let ts = df
        .column(OhlcvCol::Timestamp.as_str())
        .map_err(DataError::from)?
        .max_reduce()
        .map_err(DataError::from)?;

    use polars::prelude::AnyValue;
    match ts.value() {
        AnyValue::Null => Ok(None),
        AnyValue::Datetime(v, tu, _) | AnyValue::DatetimeOwned(v, tu, _) => {
            let micros = match tu {
                TimeUnit::Nanoseconds => v / 1_000,
                TimeUnit::Microseconds => *v,
                TimeUnit::Milliseconds => v * 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map(|dt| Some(dt.naive_utc()))
                .ok_or_else(|| {
                    DataError::TimestampConversion(format!("out of range: {micros}")).into()
                })
        }
        other => Err(DataError::TimestampConversion(format!("unexpected value: {other:?}")).into()),
    }
}
