use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::{
    config::Compression,
    error::{HermesResult, SinkError},
    sink::{DataSink, from_parquet_bytes, merge_and_deduplicate, to_parquet_bytes},
};

/// Writes market data to local parquet files, one file per symbol.
///
/// The file is rewritten atomically on each chunk write (temp file +
/// rename) after merge-dedupe-sort.
#[derive(Debug, Clone)]
pub struct LocalFileSink {
    data_dir: PathBuf,
    compression: Compression,
}

impl LocalFileSink {
    pub fn new(data_dir: impl Into<PathBuf>, compression: Compression) -> HermesResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(SinkError::Io)?;
        info!(path = %data_dir.display(), "LocalFileSink initialized");
        Ok(Self {
            data_dir,
            compression,
        })
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.data_dir.join(format!("{symbol}.parquet"))
    }

    fn read_path(&self, path: &Path) -> HermesResult<Option<DataFrame>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path).map_err(SinkError::Io)?;
        match from_parquet_bytes(&bytes) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error reading stored frame");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl DataSink for LocalFileSink {
    async fn write(&self, symbol: &str, frame: DataFrame) -> HermesResult<()> {
        let path = self.path_for(symbol);
        let existing = self.read_path(&path)?;
        let merged = merge_and_deduplicate(frame, existing)?;
        let rows = merged.height();

        let bytes = to_parquet_bytes(merged, self.compression)?;

        // Temp file + rename so a crash mid-write never corrupts the store.
        let tmp = path.with_extension("parquet.tmp");
        fs::write(&tmp, bytes).map_err(SinkError::Io)?;
        fs::rename(&tmp, &path).map_err(SinkError::Io)?;

        info!(symbol, rows, path = %path.display(), "Wrote frame");
        Ok(())
    }

    async fn read(&self, symbol: &str) -> HermesResult<Option<DataFrame>> {
        self.read_path(&self.path_for(symbol))
    }

    async fn exists(&self, symbol: &str) -> bool {
        self.path_for(symbol).exists()
    }

    async fn list_symbols(&self) -> HermesResult<Vec<String>> {
        let mut symbols = Vec::new();
        for entry in fs::read_dir(&self.data_dir).map_err(SinkError::Io)? {
            let path = entry.map_err(SinkError::Io)?.path();
            if path.extension().is_some_and(|ext| ext == "parquet")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                symbols.push(stem.to_string());
            }
        }
        symbols.sort();
        Ok(symbols)
    }
}
