pub mod durable;
pub mod memory;

use polars::prelude::DataFrame;
use sha2::{Digest, Sha256};

pub use durable::DurableCache;
pub use memory::MemoryCache;

/// Read-through cache for assembled market data frames.
///
/// Implementations never propagate failures: a broken cache degrades to a
/// miss (logged), and the primary operation proceeds against the sink.
pub trait DataCache: Send + Sync {
    fn get(&self, symbols: &[String], start: Option<&str>, end: Option<&str>)
    -> Option<DataFrame>;

    fn set(&self, symbols: &[String], start: Option<&str>, end: Option<&str>, data: &DataFrame);

    fn clear(&self);

    fn stats(&self) -> CacheStats;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub size_mb: f64,
    pub max_size_mb: f64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate_percent(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64 * 100.0
    }
}

/// Deterministic cache key over the sorted symbol set and date bounds.
pub(crate) fn cache_key(symbols: &[String], start: Option<&str>, end: Option<&str>) -> String {
    let mut sorted: Vec<&str> = symbols.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let raw = format!(
        "{}:{}:{}",
        sorted.join(","),
        start.unwrap_or(""),
        end.unwrap_or("")
    );
    let digest = Sha256::digest(raw.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
