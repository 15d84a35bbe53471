use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::StreamExt;
use polars::prelude::{DataFrame, df};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::{
    config::Settings,
    data::{Instrument, OhlcvCol, instrument::read_instruments},
    error::{HermesResult, SourceError},
    source::{Chunk, ChunkStream, ChunkWindow, DataSource, RateLimiter, chunk_windows},
};

const BASE_URL: &str = "https://kite.zerodha.com/oms";
const MAX_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Debug, Deserialize)]
struct CandleResponse {
    status: String,
    message: Option<String>,
    data: Option<CandleData>,
}

#[derive(Debug, Deserialize)]
struct CandleData {
    candles: Vec<Vec<Value>>,
}

/// Historical minute-data source for the Zerodha Kite API.
///
/// Fetching is chunked (default 60-day windows), rate limited through a
/// shared token bucket, and retried with bounded backoff. Timestamps are
/// normalized to naive wall clock before emission.
#[derive(Debug, Clone)]
pub struct ZerodhaSource {
    http: reqwest::Client,
    base_url: String,
    enctoken: String,
    user_id: Option<String>,
    chunk_days: i64,
    instrument_file: std::path::PathBuf,
    limiter: Arc<RateLimiter>,
}

impl ZerodhaSource {
    pub fn new(settings: &Settings) -> HermesResult<Self> {
        let enctoken = settings.zerodha_enctoken.clone().ok_or_else(|| {
            SourceError::MissingCredentials(
                "Zerodha enctoken required. Set HERMES_ZERODHA_ENCTOKEN.".to_string(),
            )
        })?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SourceError::from)?;

        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
            enctoken,
            user_id: settings.zerodha_user_id.clone(),
            chunk_days: settings.chunk_days,
            instrument_file: settings.instrument_file.clone(),
            limiter: Arc::new(RateLimiter::new(settings.rate_limit_per_sec)),
        })
    }

    /// Points the source at a different endpoint. Test seam.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn historical_url(&self, token: u32) -> String {
        format!("{}/instruments/historical/{token}/minute", self.base_url)
    }

    /// Fetches one chunk window with retry/backoff.
    ///
    /// - 429: exponential backoff `2 * (attempt + 1)` seconds, 3 attempts.
    /// - Transport error: linear backoff `1 * (attempt + 1)` seconds, 3 attempts.
    /// - 400: empty window, not retried.
    /// - Non-success body: stream stops with an API error.
    async fn fetch_window(&self, token: u32, window: ChunkWindow) -> HermesResult<Chunk> {
        let url = self.historical_url(token);
        let mut query: Vec<(&str, String)> = vec![
            ("from", window.from.format("%Y-%m-%d").to_string()),
            ("to", window.to.format("%Y-%m-%d").to_string()),
            ("oi", "1".to_string()),
        ];
        if let Some(user_id) = &self.user_id {
            query.push(("user_id", user_id.clone()));
        }

        let mut last_err = SourceError::RateLimitExhausted(token);
        for attempt in 0..MAX_ATTEMPTS {
            self.limiter.acquire().await;

            let response = self
                .http
                .get(&url)
                .header("Authorization", format!("enctoken {}", self.enctoken))
                .header("Accept", "application/json")
                .header("User-Agent", USER_AGENT)
                .query(&query)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    warn!(token, attempt, error = %e, "Request failed");
                    last_err = SourceError::from(e);
                    sleep(Duration::from_secs(attempt as u64 + 1)).await;
                    continue;
                }
            };

            match response.status().as_u16() {
                429 => {
                    warn!(token, attempt, "Rate limit hit, backing off");
                    last_err = SourceError::RateLimitExhausted(token);
                    sleep(Duration::from_secs((attempt as u64 + 1) * 2)).await;
                    continue;
                }
                // No data for this window.
                400 => return Ok(Chunk::empty(window.from, window.to)),
                _ => {}
            }

            let response = match response.error_for_status() {
                Ok(r) => r,
                Err(e) => {
                    warn!(token, attempt, error = %e, "Upstream returned error status");
                    last_err = SourceError::from(e);
                    sleep(Duration::from_secs(attempt as u64 + 1)).await;
                    continue;
                }
            };

            let body: CandleResponse = response.json().await.map_err(SourceError::from)?;
            if body.status != "success" {
                let message = body.message.unwrap_or_else(|| "unknown".to_string());
                error!(token, %message, "Broker API error");
                return Err(SourceError::Api { token, message }.into());
            }

            let candles = body.data.map(|d| d.candles).unwrap_or_default();
            let frame = parse_candles(&candles)?;
            return Ok(Chunk {
                frame,
                from: window.from,
                to: window.to,
            });
        }

        Err(last_err.into())
    }
}

#[async_trait]
impl DataSource for ZerodhaSource {
    fn list_instruments(&self) -> HermesResult<Vec<Instrument>> {
        read_instruments(&self.instrument_file)
    }

    fn fetch_chunks(
        &self,
        symbol: &str,
        token: u32,
        from: NaiveDate,
        to: NaiveDate,
    ) -> ChunkStream {
        let windows = chunk_windows(from, to, self.chunk_days);
        let symbol = symbol.to_string();
        let source = self.clone();

        futures::stream::iter(windows)
            .then(move |window| {
                let source = source.clone();
                let symbol = symbol.clone();
                async move {
                    let chunk = source.fetch_window(token, window).await?;
                    debug!(
                        %symbol,
                        from = %window.from,
                        to = %window.to,
                        rows = chunk.frame.height(),
                        "Fetched chunk"
                    );
                    Ok(chunk)
                }
            })
            .boxed()
    }

    fn calculate_chunks(&self, from: NaiveDate, to: NaiveDate) -> usize {
        chunk_windows(from, to, self.chunk_days).len()
    }

    async fn close(&self) {
        // The HTTP client releases its pool on drop; nothing else is held.
        debug!("Zerodha source closed");
    }
}

/// Parses the broker candle arrays `[ts, o, h, l, c, v, oi]` into a typed
/// frame with a naive wall-clock timestamp column.
fn parse_candles(candles: &[Vec<Value>]) -> HermesResult<DataFrame> {
    let len = candles.len();
    let mut timestamps: Vec<NaiveDateTime> = Vec::with_capacity(len);
    let mut opens = Vec::with_capacity(len);
    let mut highs = Vec::with_capacity(len);
    let mut lows = Vec::with_capacity(len);
    let mut closes = Vec::with_capacity(len);
    let mut volumes = Vec::with_capacity(len);
    let mut ois = Vec::with_capacity(len);

    for candle in candles {
        if candle.len() < 6 {
            return Err(SourceError::MalformedResponse(format!(
                "candle has {} fields, expected at least 6",
                candle.len()
            ))
            .into());
        }
        timestamps.push(parse_broker_timestamp(&candle[0])?);
        opens.push(number(&candle[1])?);
        highs.push(number(&candle[2])?);
        lows.push(number(&candle[3])?);
        closes.push(number(&candle[4])?);
        volumes.push(number(&candle[5])?);
        ois.push(candle.get(6).map(number).transpose()?.unwrap_or(0.0));
    }

    let frame = df![
        OhlcvCol::Timestamp.to_string() => timestamps,
        OhlcvCol::Open.to_string() => opens,
        OhlcvCol::High.to_string() => highs,
        OhlcvCol::Low.to_string() => lows,
        OhlcvCol::Close.to_string() => closes,
        OhlcvCol::Volume.to_string() => volumes,
        OhlcvCol::Oi.to_string() => ois,
    ]
    .map_err(|e| SourceError::MalformedResponse(e.to_string()))?;

    Ok(frame)
}

/// Broker timestamps arrive with a timezone offset (`2024-01-02T09:15:00+0530`);
/// the stored wall clock is the broker-local time with the offset dropped.
fn parse_broker_timestamp(value: &Value) -> Result<NaiveDateTime, SourceError> {
    let raw = value
        .as_str()
        .ok_or_else(|| SourceError::MalformedResponse(format!("non-string timestamp: {value}")))?;
    DateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|dt| dt.naive_local())
        .map_err(|e| SourceError::MalformedResponse(format!("bad timestamp '{raw}': {e}")))
}

fn number(value: &Value) -> Result<f64, SourceError> {
    value
        .as_f64()
        .ok_or_else(|| SourceError::MalformedResponse(format!("non-numeric field: {value}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::HermesError;
    use chrono::{NaiveDate, Timelike};
    use serde_json::json;

    #[test]
    fn candles_parse_into_a_typed_frame() {
        let candles = vec![
            vec![
                json!("2024-01-02T09:15:00+0530"),
                json!(100.0),
                json!(101.5),
                json!(99.5),
                json!(101.0),
                json!(125000.0),
                json!(0),
            ],
            vec![
                json!("2024-01-02T09:16:00+0530"),
                json!(101.0),
                json!(102.0),
                json!(100.5),
                json!(101.5),
                json!(98000.0),
                json!(0),
            ],
        ];

        let frame = parse_candles(&candles).unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.width(), 7);

        // Offset dropped, wall clock preserved.
        let first = crate::data::frame::max_timestamp(
            &frame.head(Some(1)),
        )
        .unwrap()
        .unwrap();
        assert_eq!(first.date(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(first.time().hour(), 9);
        assert_eq!(first.time().minute(), 15);
    }

    #[test]
    fn missing_oi_defaults_to_zero() {
        let candles = vec![vec![
            json!("2024-01-02T09:15:00+0530"),
            json!(10.0),
            json!(11.0),
            json!(9.0),
            json!(10.5),
            json!(1000.0),
        ]];
        let frame = parse_candles(&candles).unwrap();
        assert_eq!(frame.height(), 1);
    }

    #[test]
    fn short_candle_rows_are_malformed() {
        let candles = vec![vec![json!("2024-01-02T09:15:00+0530"), json!(10.0)]];
        let err = parse_candles(&candles).unwrap_err();
        assert!(matches!(
            err,
            HermesError::Source(SourceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn empty_candle_list_parses_to_empty_frame() {
        let frame = parse_candles(&[]).unwrap();
        assert_eq!(frame.height(), 0);
    }

    #[test]
    fn non_success_body_deserializes_with_message() {
        let body: CandleResponse = serde_json::from_str(
            r#"{"status": "error", "message": "Invalid token", "data": null}"#,
        )
        .unwrap();
        assert_eq!(body.status, "error");
        assert_eq!(body.message.as_deref(), Some("Invalid token"));
    }
}
