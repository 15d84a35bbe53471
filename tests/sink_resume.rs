//! Sink merge laws and orchestrator resume correctness against a shared
//! local sink.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use futures::StreamExt;
use hermes::config::{Compression, Settings};
use hermes::data::{Instrument, OhlcvCol, frame::max_timestamp};
use hermes::error::HermesResult;
use hermes::ingest::IngestOrchestrator;
use hermes::ingest::progress::LogProgress;
use hermes::sink::{DataSink, LocalFileSink};
use hermes::source::{Chunk, ChunkStream, DataSource, chunk_windows};
use polars::prelude::{DataFrame, df};

fn day_bar(date: &str, close: f64) -> (NaiveDateTime, f64) {
    let ts = format!("{date}T09:15:00")
        .parse::<NaiveDateTime>()
        .unwrap();
    (ts, close)
}

fn frame_of(bars: &[(NaiveDateTime, f64)]) -> DataFrame {
    let timestamps: Vec<NaiveDateTime> = bars.iter().map(|(ts, _)| *ts).collect();
    let closes: Vec<f64> = bars.iter().map(|(_, c)| *c).collect();
    df![
        OhlcvCol::Timestamp.to_string() => timestamps,
        OhlcvCol::Open.to_string() => closes.clone(),
        OhlcvCol::High.to_string() => closes.clone(),
        OhlcvCol::Low.to_string() => closes.clone(),
        OhlcvCol::Close.to_string() => closes,
        OhlcvCol::Volume.to_string() => vec![100.0; bars.len()],
        OhlcvCol::Oi.to_string() => vec![0.0; bars.len()],
    ]
    .unwrap()
}

#[tokio::test]
async fn overlapping_chunks_store_the_deduplicated_union() {
    // S5: write [t0, t1], then [t1 - 1day, t2].
    let dir = tempfile::tempdir().unwrap();
    let sink = LocalFileSink::new(dir.path(), Compression::Zstd).unwrap();

    let first = frame_of(&[
        day_bar("2024-01-01", 10.0),
        day_bar("2024-01-02", 11.0),
        day_bar("2024-01-03", 12.0),
    ]);
    let second = frame_of(&[
        day_bar("2024-01-03", 12.0),
        day_bar("2024-01-04", 13.0),
        day_bar("2024-01-05", 14.0),
    ]);

    sink.write("S", first).await.unwrap();
    sink.write("S", second).await.unwrap();

    let stored = sink.read("S").await.unwrap().unwrap();
    assert_eq!(stored.height(), 5);
    assert_eq!(
        sink.last_timestamp("S").await.unwrap().unwrap(),
        day_bar("2024-01-05", 0.0).0
    );
}

#[tokio::test]
async fn double_write_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let sink = LocalFileSink::new(dir.path(), Compression::Zstd).unwrap();
    let frame = frame_of(&[day_bar("2024-01-01", 10.0), day_bar("2024-01-02", 11.0)]);

    sink.write("S", frame.clone()).await.unwrap();
    let once = sink.read("S").await.unwrap().unwrap();
    sink.write("S", frame).await.unwrap();
    let twice = sink.read("S").await.unwrap().unwrap();

    assert_eq!(once, twice);
}

// ================================================================================================
// Resume law: split ranges through the orchestrator equal the single shot
// ================================================================================================

/// Serves a fixed minute tape, sliced to whatever window is requested.
struct TapeSource {
    tape: Vec<(NaiveDateTime, f64)>,
    chunk_days: i64,
}

impl TapeSource {
    fn slice(&self, from: NaiveDate, to: NaiveDate) -> Vec<(NaiveDateTime, f64)> {
        self.tape
            .iter()
            .filter(|(ts, _)| ts.date() >= from && ts.date() <= to)
            .copied()
            .collect()
    }
}

#[async_trait]
impl DataSource for TapeSource {
    fn list_instruments(&self) -> HermesResult<Vec<Instrument>> {
        Ok(vec![Instrument {
            symbol: "S".to_string(),
            token: 1,
            exchange: None,
        }])
    }

    fn fetch_chunks(
        &self,
        _symbol: &str,
        _token: u32,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ChunkStream {
        let chunks: Vec<HermesResult<Chunk>> = chunk_windows(from, to, self.chunk_days)
            .into_iter()
            .map(|w| {
                let bars = self.slice(w.from, w.to);
                Ok(if bars.is_empty() {
                    Chunk::empty(w.from, w.to)
                } else {
                    Chunk {
                        frame: frame_of(&bars),
                        from: w.from,
                        to: w.to,
                    }
                })
            })
            .collect();
        futures::stream::iter(chunks).boxed()
    }

    fn calculate_chunks(&self, from: NaiveDate, to: NaiveDate) -> usize {
        chunk_windows(from, to, self.chunk_days).len()
    }

    async fn close(&self) {}
}

fn tape() -> Vec<(NaiveDateTime, f64)> {
    // Ten trading days of one bar each.
    (1..=10)
        .map(|day| day_bar(&format!("2024-01-{day:02}"), 100.0 + day as f64))
        .collect()
}

async fn run_sync(sink: Arc<LocalFileSink>, tape_from: usize, tape_to: usize) {
    let source = Arc::new(TapeSource {
        tape: tape()[tape_from..tape_to].to_vec(),
        chunk_days: 3,
    });
    let settings = Settings {
        start_date: "2024-01-01".to_string(),
        ..Settings::default()
    };
    let orchestrator = IngestOrchestrator::new(
        source,
        sink,
        Arc::new(LogProgress::default()),
        settings,
    );
    let results = orchestrator.sync(None, None, None).await.unwrap();
    assert_eq!(results.get("S"), Some(&true));
}

#[tokio::test]
async fn split_fetch_equals_single_shot_fetch() {
    // Single shot over the whole tape.
    let single_dir = tempfile::tempdir().unwrap();
    let single_sink = Arc::new(LocalFileSink::new(single_dir.path(), Compression::Zstd).unwrap());
    run_sync(single_sink.clone(), 0, 10).await;

    // The same tape in two consecutive passes against one shared sink.
    let split_dir = tempfile::tempdir().unwrap();
    let split_sink = Arc::new(LocalFileSink::new(split_dir.path(), Compression::Zstd).unwrap());
    run_sync(split_sink.clone(), 0, 6).await;
    run_sync(split_sink.clone(), 5, 10).await;

    let single = single_sink.read("S").await.unwrap().unwrap();
    let split = split_sink.read("S").await.unwrap().unwrap();

    assert_eq!(single, split);
    assert_eq!(
        max_timestamp(&single).unwrap(),
        max_timestamp(&split).unwrap()
    );
}
