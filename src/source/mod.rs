pub mod limiter;
pub mod zerodha;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;
use polars::prelude::DataFrame;

use crate::{data::Instrument, error::HermesResult};

pub use limiter::RateLimiter;
pub use zerodha::ZerodhaSource;

/// One bounded date window of a single symbol's bars, fetched as a unit.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub frame: DataFrame,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Chunk {
    /// An empty-window marker (HTTP 400: no data for this range).
    pub fn empty(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            frame: DataFrame::empty(),
            from,
            to,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }
}

/// Lazy sequence of chunks for one symbol, yielded in ascending window
/// order. Consuming an element drives the next fetch; nothing is
/// prefetched.
pub type ChunkStream = BoxStream<'static, HermesResult<Chunk>>;

/// A broker historical-data provider.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Lists available instruments, filtered to equities.
    fn list_instruments(&self) -> HermesResult<Vec<Instrument>>;

    /// Streams OHLCV chunks for `[from, to]`, one element per chunk window.
    /// Every chunk internally awaits the shared rate limiter.
    fn fetch_chunks(&self, symbol: &str, token: u32, from: NaiveDate, to: NaiveDate)
    -> ChunkStream;

    /// Number of chunks `fetch_chunks` will produce for `[from, to]`.
    /// Drives progress reporting.
    fn calculate_chunks(&self, from: NaiveDate, to: NaiveDate) -> usize;

    /// Idempotent resource release.
    async fn close(&self);
}

/// A bounded date window `[from, to]` within a fetch range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Splits `[start, end)` into windows of at most `chunk_days` days.
///
/// Windows step `chunk_days` then skip one day, so consecutive windows do
/// not overlap; the broker range is inclusive on both ends.
pub fn chunk_windows(start: NaiveDate, end: NaiveDate, chunk_days: i64) -> Vec<ChunkWindow> {
    let mut windows = Vec::new();
    let mut current = start;
    while current < end {
        let next = (current + chrono::Duration::days(chunk_days)).min(end);
        windows.push(ChunkWindow {
            from: current,
            to: next,
        });
        current = next + chrono::Duration::days(1);
    }
    windows
}
