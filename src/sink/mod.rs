pub mod factory;
pub mod local;
pub mod object;

use std::io::Cursor;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use polars::prelude::{
    DataFrame, IntoLazy, ParquetCompression, ParquetReader, ParquetWriter, SerReader,
    SortMultipleOptions, UniqueKeepStrategy, by_name,
};

use crate::{
    config::Compression,
    data::{OhlcvCol, frame::max_timestamp},
    error::{HermesResult, SinkError},
};

pub use factory::build_sink;
pub use local::LocalFileSink;
pub use object::{ObjectStoreSink, S3Endpoint};

/// A storage destination for per-symbol OHLCV frames.
///
/// Writes are idempotent: re-writing a chunk that overlaps existing data
/// merges and deduplicates by timestamp. Concurrent readers are safe;
/// concurrent writers to the same symbol are not (the orchestrator never
/// fetches a symbol from two tasks at once).
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Merges `frame` into the stored data for `symbol`: concatenate,
    /// deduplicate on timestamp, sort ascending, replace atomically.
    async fn write(&self, symbol: &str, frame: DataFrame) -> HermesResult<()>;

    /// Reads the stored frame, or `None` when absent. Never errors on
    /// absence.
    async fn read(&self, symbol: &str) -> HermesResult<Option<DataFrame>>;

    async fn exists(&self, symbol: &str) -> bool;

    /// All stored symbols, sorted.
    async fn list_symbols(&self) -> HermesResult<Vec<String>>;

    /// Last stored bar timestamp; drives resume.
    async fn last_timestamp(&self, symbol: &str) -> HermesResult<Option<NaiveDateTime>> {
        match self.read(symbol).await? {
            Some(frame) => max_timestamp(&frame),
            None => Ok(None),
        }
    }
}

/// Merge new data with existing: concatenate, deduplicate on timestamp,
/// sort ascending.
pub(crate) fn merge_and_deduplicate(
    new_frame: DataFrame,
    existing: Option<DataFrame>,
) -> HermesResult<DataFrame> {
    let combined = match existing {
        Some(mut existing) => {
            existing.vstack_mut(&new_frame).map_err(|e| {
                SinkError::WriteFailed(format!("failed to stack frames: {e}"))
            })?;
            existing
        }
        None => new_frame,
    };

    let merged = combined
        .lazy()
        .unique_stable(
            Some(by_name([OhlcvCol::Timestamp.as_str()], true)),
            UniqueKeepStrategy::First,
        )
        .sort([OhlcvCol::Timestamp.as_str()], SortMultipleOptions::default())
        .collect()
        .map_err(|e| SinkError::WriteFailed(format!("merge-dedup failed: {e}")))?;

    Ok(merged)
}

/// Serializes a frame to compressed parquet bytes.
pub(crate) fn to_parquet_bytes(
    mut frame: DataFrame,
    compression: Compression,
) -> HermesResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ParquetWriter::new(&mut buffer)
        .with_compression(parquet_codec(compression))
        .finish(&mut frame)
        .map_err(|e| SinkError::WriteFailed(format!("parquet serialization failed: {e}")))?;
    Ok(buffer)
}

/// Deserializes parquet bytes. Compression is auto-detected from the file
/// metadata, so any codec round-trips.
pub(crate) fn from_parquet_bytes(bytes: &[u8]) -> HermesResult<DataFrame> {
    ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(|e| SinkError::ReadFailed(format!("parquet deserialization failed: {e}")).into())
}

fn parquet_codec(compression: Compression) -> ParquetCompression {
    match compression {
        Compression::Zstd => ParquetCompression::Zstd(None),
        Compression::Snappy => ParquetCompression::Snappy,
        Compression::Lz4 => ParquetCompression::Lz4Raw,
        Compression::Gzip => ParquetCompression::Gzip(None),
        Compression::Uncompressed => ParquetCompression::Uncompressed,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, NaiveDateTime};
    use polars::prelude::{DataFrame, df};

    use crate::data::OhlcvCol;

    pub fn minute(offset: i64) -> NaiveDateTime {
        DateTime::from_timestamp(1_704_188_100 + offset * 60, 0)
            .unwrap()
            .naive_utc()
    }

    /// A flat OHLCV frame with bars at the given minute offsets.
    pub fn bars(offsets: &[i64], close: f64) -> DataFrame {
        let timestamps: Vec<NaiveDateTime> = offsets.iter().map(|o| minute(*o)).collect();
        let n = offsets.len();
        df![
            OhlcvCol::Timestamp.to_string() => timestamps,
            OhlcvCol::Open.to_string() => vec![close; n],
            OhlcvCol::High.to_string() => vec![close; n],
            OhlcvCol::Low.to_string() => vec![close; n],
            OhlcvCol::Close.to_string() => vec![close; n],
            OhlcvCol::Volume.to_string() => vec![1000.0; n],
            OhlcvCol::Oi.to_string() => vec![0.0; n],
        ]
        .unwrap()
    }
}

#[cfg(test)]
mod test {
    use super::{test_support::*, *};

    #[test]
    fn merge_deduplicates_on_timestamp_and_sorts() {
        let first = bars(&[0, 1, 2], 100.0);
        let second = bars(&[2, 3], 101.0);

        let merged = merge_and_deduplicate(second, Some(first)).unwrap();
        assert_eq!(merged.height(), 4);

        let ts = max_timestamp(&merged).unwrap().unwrap();
        assert_eq!(ts, minute(3));
    }

    #[test]
    fn merge_is_idempotent() {
        let frame = bars(&[0, 1, 2], 100.0);
        let once = merge_and_deduplicate(frame.clone(), None).unwrap();
        let twice = merge_and_deduplicate(frame, Some(once.clone())).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn parquet_round_trips_for_every_codec() {
        let frame = bars(&[0, 1], 42.0);
        for codec in [
            Compression::Zstd,
            Compression::Snappy,
            Compression::Lz4,
            Compression::Gzip,
            Compression::Uncompressed,
        ] {
            let bytes = to_parquet_bytes(frame.clone(), codec).unwrap();
            let restored = from_parquet_bytes(&bytes).unwrap();
            assert_eq!(frame, restored, "codec {codec}");
        }
    }
}
