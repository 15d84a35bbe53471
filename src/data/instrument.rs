use std::path::Path;

use polars::prelude::{
    DataType, LazyCsvReader, LazyFileListReader, PlPath, col, lit,
};
use serde::{Deserialize, Serialize};

use crate::error::{DataError, HermesResult};

const TOKEN_COL: &str = "instrument_token";
const SYMBOL_COL: &str = "tradingsymbol";
const TYPE_COL: &str = "instrument_type";
const EXCHANGE_COL: &str = "exchange";

const EQUITY_TYPE: &str = "EQ";

/// A tradable instrument as listed by the broker.
///
/// `symbol` is the user-facing unique key; `token` is the broker-side
/// numeric id used in fetch URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub token: u32,
    pub exchange: Option<String>,
}

/// Reads the broker instrument dump (UTF-8, headered CSV) and keeps only
/// equity rows.
pub fn read_instruments(path: &Path) -> HermesResult<Vec<Instrument>> {
    if !path.exists() {
        return Err(DataError::InstrumentFileNotFound(path.display().to_string()).into());
    }
    let path_str = path
        .to_str()
        .ok_or_else(|| DataError::InstrumentFileNotFound(path.display().to_string()))?;

    tracing::info!(path = path_str, "Reading instruments");

    let df = LazyCsvReader::new(PlPath::new(path_str))
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .with_ignore_errors(true)
        .finish()
        .map_err(DataError::from)?
        .filter(col(TYPE_COL).eq(lit(EQUITY_TYPE)))
        .collect()
        .map_err(DataError::from)?;

    let has_exchange = df.schema().contains(EXCHANGE_COL);

    let tokens = df
        .column(TOKEN_COL)
        .map_err(DataError::from)?
        .cast(&DataType::UInt32)
        .map_err(DataError::from)?;
    let tokens = tokens.u32().map_err(DataError::from)?;
    let symbols = df.column(SYMBOL_COL).map_err(DataError::from)?;
    let symbols = symbols.str().map_err(DataError::from)?;
    let exchanges = if has_exchange {
        Some(
            df.column(EXCHANGE_COL)
                .map_err(DataError::from)?
                .str()
                .map_err(DataError::from)?
                .clone(),
        )
    } else {
        None
    };

    let mut instruments = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let (Some(token), Some(symbol)) = (tokens.get(idx), symbols.get(idx)) else {
            continue;
        };
        instruments.push(Instrument {
            symbol: symbol.to_string(),
            token,
            exchange: exchanges
                .as_ref()
                .and_then(|e| e.get(idx))
                .map(|s| s.to_string()),
        });
    }

    tracing::info!(count = instruments.len(), "Loaded instruments");
    Ok(instruments)
}
