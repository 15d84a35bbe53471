use polars::prelude::{
    AsOfOptions, AsofStrategy, ClosedWindow, DataFrame, DataType, Duration, DynamicGroupOptions,
    Expr, IntoLazy, JoinArgs, JoinType, Label, SortMultipleOptions, StartBy, col, lit,
};

use crate::{
    data::OhlcvCol,
    error::{DataError, HermesResult},
};

/// The execution timeframe. Frames come out of the sink at this
/// resolution; analysis timeframes above it go through the broadcaster.
pub const EXECUTION_TIMEFRAME: &str = "1m";

const TIMEFRAME_UNITS: [&str; 8] = ["mo", "s", "m", "h", "d", "w", "q", "y"];

/// Parses a timeframe string (`"15m"`, `"1h"`, `"1d"`) into a polars
/// duration, rejecting anything the resampler cannot honor.
pub fn parse_timeframe(timeframe: &str) -> HermesResult<Duration> {
    let digits: String = timeframe.chars().take_while(char::is_ascii_digit).collect();
    let unit = &timeframe[digits.len()..];

    if digits.is_empty() || digits.parse::<u32>().map_or(true, |n| n == 0) {
        return Err(DataError::InvalidTimeframe(timeframe.to_string()).into());
    }
    if !TIMEFRAME_UNITS.contains(&unit) {
        return Err(DataError::InvalidTimeframe(timeframe.to_string()).into());
    }
    Ok(Duration::parse(timeframe))
}

/// Resamples an execution frame to analysis bars.
///
/// Bars are labeled by window start and closed on the left: the bar
/// labeled `H` aggregates `[H, H + every)` with
/// `{open: first, high: max, low: min, close: last, volume: sum}`, and
/// carries the first symbol tag when present.
pub fn resample(frame: DataFrame, timeframe: &str) -> HermesResult<DataFrame> {
    let every = parse_timeframe(timeframe)?;
    let has_symbol = frame.schema().contains(OhlcvCol::Symbol.as_str());

    let mut aggs: Vec<Expr> = vec![
        col(OhlcvCol::Open).first().alias(OhlcvCol::Open),
        col(OhlcvCol::High).max().alias(OhlcvCol::High),
        col(OhlcvCol::Low).min().alias(OhlcvCol::Low),
        col(OhlcvCol::Close).last().alias(OhlcvCol::Close),
        col(OhlcvCol::Volume).sum().alias(OhlcvCol::Volume),
    ];
    if has_symbol {
        aggs.push(col(OhlcvCol::Symbol).first().alias(OhlcvCol::Symbol));
    }

    let options = DynamicGroupOptions {
        index_column: OhlcvCol::Timestamp.name(),
        every,
        period: every,
        offset: Duration::parse("0s"),
        label: Label::Left,
        include_boundaries: false,
        closed_window: ClosedWindow::Left,
        start_by: StartBy::WindowBound,
    };

    frame
        .lazy()
        .sort([OhlcvCol::Timestamp.as_str()], SortMultipleOptions::default())
        .group_by_dynamic(col(OhlcvCol::Timestamp), Vec::<Expr>::new(), options)
        .agg(aggs)
        .collect()
        .map_err(|e| DataError::from(e).into())
}

/// Broadcasts analysis-frame strategy output back onto the execution
/// frame without leaking the future.
///
/// Every non-OHLCV column of the analysis frame is shifted by one
/// analysis bar before an as-of backward join: the bar labeled `H` closes
/// at `H + tf - ε`, so its signal may only become visible at `H + tf`.
/// Execution-side OHLCV columns are preserved; analysis columns append.
pub fn shift_and_join(execution: DataFrame, analysis: DataFrame) -> HermesResult<DataFrame> {
    let excluded = [
        OhlcvCol::Timestamp.as_str(),
        OhlcvCol::Open.as_str(),
        OhlcvCol::High.as_str(),
        OhlcvCol::Low.as_str(),
        OhlcvCol::Close.as_str(),
        OhlcvCol::Volume.as_str(),
        OhlcvCol::Oi.as_str(),
        OhlcvCol::Symbol.as_str(),
    ];

    let broadcast_cols: Vec<String> = analysis
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| !excluded.contains(&name.as_str()))
        .collect();

    let mut selection: Vec<Expr> = vec![col(OhlcvCol::Timestamp)];
    selection.extend(
        broadcast_cols
            .iter()
            .map(|name| col(name.as_str()).shift(lit(1))),
    );

    let shifted = analysis
        .lazy()
        .sort([OhlcvCol::Timestamp.as_str()], SortMultipleOptions::default())
        .select(selection);

    let options = AsOfOptions {
        strategy: AsofStrategy::Backward,
        ..Default::default()
    };

    let mut joined = execution
        .lazy()
        .sort([OhlcvCol::Timestamp.as_str()], SortMultipleOptions::default())
        .join(
            shifted,
            [col(OhlcvCol::Timestamp)],
            [col(OhlcvCol::Timestamp)],
            JoinArgs::new(JoinType::AsOf(Box::new(options))),
        );

    // Bars before the first latched analysis signal stay flat.
    if broadcast_cols.iter().any(|c| c == OhlcvCol::Signal.as_str()) {
        joined = joined.with_column(
            col(OhlcvCol::Signal)
                .cast(DataType::Float64)
                .fill_null(lit(0.0))
                .alias(OhlcvCol::Signal),
        );
    }

    joined.collect().map_err(|e| DataError::from(e).into())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{DateTime, NaiveDateTime};
    use polars::prelude::df;

    fn minute(offset: i64) -> NaiveDateTime {
        // 2024-01-02 10:00:00 plus offset minutes.
        DateTime::from_timestamp(1_704_189_600 + offset * 60, 0)
            .unwrap()
            .naive_utc()
    }

    /// 120 minutes of data: close 90 for the first hour, 110 after.
    fn two_hours() -> DataFrame {
        let timestamps: Vec<NaiveDateTime> = (0..120).map(minute).collect();
        let closes: Vec<f64> = (0..120).map(|i| if i < 60 { 90.0 } else { 110.0 }).collect();
        df![
            OhlcvCol::Timestamp.to_string() => timestamps,
            OhlcvCol::Open.to_string() => closes.clone(),
            OhlcvCol::High.to_string() => closes.clone(),
            OhlcvCol::Low.to_string() => closes.clone(),
            OhlcvCol::Close.to_string() => closes,
            OhlcvCol::Volume.to_string() => vec![100.0; 120],
        ]
        .unwrap()
    }

    #[test]
    fn timeframes_parse_or_reject() {
        assert!(parse_timeframe("1m").is_ok());
        assert!(parse_timeframe("15m").is_ok());
        assert!(parse_timeframe("1h").is_ok());
        assert!(parse_timeframe("1d").is_ok());
        assert!(parse_timeframe("0m").is_err());
        assert!(parse_timeframe("h").is_err());
        assert!(parse_timeframe("1x").is_err());
        assert!(parse_timeframe("").is_err());
    }

    #[test]
    fn hourly_resample_aggregates_ohlcv() {
        let resampled = resample(two_hours(), "1h").unwrap();
        assert_eq!(resampled.height(), 2);

        let closes: Vec<f64> = resampled
            .column(OhlcvCol::Close.as_str())
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(closes, vec![90.0, 110.0]);

        let volumes: Vec<f64> = resampled
            .column(OhlcvCol::Volume.as_str())
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(volumes, vec![6_000.0, 6_000.0]);
    }

    #[test]
    fn broadcast_delays_signals_by_one_analysis_bar() {
        let analysis = resample(two_hours(), "1h").unwrap();
        // Strategy: long iff close > 100. Hour 0 -> 0, hour 1 -> 1.
        let analysis = analysis
            .lazy()
            .with_column(
                polars::prelude::when(col(OhlcvCol::Close).gt(lit(100.0)))
                    .then(lit(1.0))
                    .otherwise(lit(0.0))
                    .alias(OhlcvCol::Signal),
            )
            .collect()
            .unwrap();

        let joined = shift_and_join(two_hours(), analysis).unwrap();
        assert_eq!(joined.height(), 120);

        let signals: Vec<f64> = joined
            .column(OhlcvCol::Signal.as_str())
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();

        // The 11:00 analysis signal (computed on [11:00, 12:00)) would
        // only become visible at 12:00; the series ends at 11:59, so
        // every minute stays flat.
        assert!(signals.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn broadcast_preserves_minute_ohlcv() {
        let analysis = resample(two_hours(), "1h").unwrap();
        let analysis = analysis
            .lazy()
            .with_column(lit(1.0).alias(OhlcvCol::Signal))
            .collect()
            .unwrap();

        let joined = shift_and_join(two_hours(), analysis).unwrap();
        let closes: Vec<f64> = joined
            .column(OhlcvCol::Close.as_str())
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(closes.len(), 120);
        assert_eq!(closes[0], 90.0);
        assert_eq!(closes[119], 110.0);
    }
}
