use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::{DataFrame, IntoLazy, LazyFrame, UnionArgs, col, concat, lit};
use tracing::{info, warn};

use crate::{
    cache::DataCache,
    data::{
        OhlcvCol,
        frame::{data_guard, normalize_timestamps, sort_canonical},
    },
    error::{DataError, HermesResult},
    sink::DataSink,
};

/// Unified market data access: read-through cache over the sink, with the
/// ingress guard applied on every load.
pub struct MarketDataService {
    sink: Arc<dyn DataSink>,
    cache: Option<Arc<dyn DataCache>>,
}

impl MarketDataService {
    pub fn new(sink: Arc<dyn DataSink>, cache: Option<Arc<dyn DataCache>>) -> Self {
        Self { sink, cache }
    }

    pub fn sink(&self) -> &Arc<dyn DataSink> {
        &self.sink
    }

    /// Loads a stacked OHLCV frame for the given symbols and date range:
    /// timestamps normalized to naive wall clock, symbol column tagged,
    /// sorted by `(timestamp, symbol)`, invalid rows dropped by the
    /// ingress guard. Errors when nothing loads.
    pub async fn get_market_data(
        &self,
        symbols: &[String],
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> HermesResult<DataFrame> {
        if let Some(cache) = &self.cache
            && let Some(frame) = cache.get(symbols, start_date, end_date)
        {
            return Ok(frame);
        }

        let start = parse_bound(start_date)?;
        let end = parse_bound(end_date)?;

        let mut frames: Vec<LazyFrame> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let Some(stored) = self.sink.read(symbol).await? else {
                warn!(%symbol, "No stored data");
                continue;
            };

            let mut lf = normalize_timestamps(stored.lazy());
            if let Some(start) = start {
                lf = lf.filter(col(OhlcvCol::Timestamp).gt_eq(lit(start)));
            }
            if let Some(end) = end {
                lf = lf.filter(col(OhlcvCol::Timestamp).lt_eq(lit(end)));
            }
            frames.push(lf.with_column(lit(symbol.as_str()).alias(OhlcvCol::Symbol)));
        }

        if frames.is_empty() {
            return Err(DataError::NoData(symbols.join(", ")).into());
        }

        let combined = concat(
            frames,
            UnionArgs {
                parallel: true,
                rechunk: true,
                ..Default::default()
            },
        )
        .map_err(DataError::from)?;

        let frame = data_guard(sort_canonical(combined, true))
            .collect()
            .map_err(DataError::from)?;

        if frame.height() == 0 {
            return Err(DataError::NoData(symbols.join(", ")).into());
        }
        info!(rows = frame.height(), symbols = symbols.len(), "Loaded market data");

        if let Some(cache) = &self.cache {
            cache.set(symbols, start_date, end_date, &frame);
        }
        Ok(frame)
    }

    pub async fn list_symbols(&self) -> HermesResult<Vec<String>> {
        self.sink.list_symbols().await
    }
}

fn parse_bound(date: Option<&str>) -> HermesResult<Option<NaiveDateTime>> {
    date.map(|raw| {
        raw.parse::<NaiveDate>()
            .map(|d| d.and_time(chrono::NaiveTime::MIN))
            .map_err(|_| DataError::InvalidDate(raw.to_string()).into())
    })
    .transpose()
}
