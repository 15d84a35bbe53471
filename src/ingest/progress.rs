use std::{collections::HashMap, sync::Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use strum::Display;
use tracing::info;

/// Lifecycle state of one symbol's ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default)]
#[strum(serialize_all = "lowercase")]
pub enum SymbolStatus {
    #[default]
    Pending,
    Fetching,
    Complete,
    Failed,
}

/// Progress counters for a single symbol.
#[derive(Debug, Clone, Default)]
pub struct SymbolProgress {
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub rows_written: usize,
    pub status: SymbolStatus,
}

/// Consumer-agnostic progress event surface for ingestion.
///
/// The orchestrator emits these events; consumers render them (terminal
/// bars, logs) or ignore them. Implementations must tolerate concurrent
/// calls from independent symbol tasks.
pub trait ProgressTracker: Send + Sync {
    fn start(&self, total_symbols: usize);

    fn start_symbol(&self, symbol: &str, total_chunks: usize);

    fn update_symbol(&self, symbol: &str, chunks_done: usize, rows_written: usize);

    fn complete_symbol(&self, symbol: &str, success: bool);

    /// Stops tracking and returns the per-symbol summary.
    fn stop(&self) -> HashMap<String, SymbolProgress>;
}

// ================================================================================================
// Headless tracker
// ================================================================================================

/// Tracks progress and logs transitions; no terminal UI.
#[derive(Default)]
pub struct LogProgress {
    symbols: Mutex<HashMap<String, SymbolProgress>>,
}

impl ProgressTracker for LogProgress {
    fn start(&self, total_symbols: usize) {
        info!(total_symbols, "Starting sync");
    }

    fn start_symbol(&self, symbol: &str, total_chunks: usize) {
        let Ok(mut symbols) = self.symbols.lock() else {
            return;
        };
        symbols.insert(
            symbol.to_string(),
            SymbolProgress {
                total_chunks,
                status: SymbolStatus::Fetching,
                ..Default::default()
            },
        );
    }

    fn update_symbol(&self, symbol: &str, chunks_done: usize, rows_written: usize) {
        let Ok(mut symbols) = self.symbols.lock() else {
            return;
        };
        if let Some(progress) = symbols.get_mut(symbol) {
            progress.completed_chunks += chunks_done;
            progress.rows_written += rows_written;
        }
    }

    fn complete_symbol(&self, symbol: &str, success: bool) {
        let Ok(mut symbols) = self.symbols.lock() else {
            return;
        };
        if let Some(progress) = symbols.get_mut(symbol) {
            progress.status = if success {
                SymbolStatus::Complete
            } else {
                SymbolStatus::Failed
            };
            info!(
                symbol,
                chunks = progress.completed_chunks,
                rows = progress.rows_written,
                success,
                "Symbol finished"
            );
        }
    }

    fn stop(&self) -> HashMap<String, SymbolProgress> {
        self.symbols
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

// ================================================================================================
// Terminal tracker
// ================================================================================================

/// Rich terminal progress: one overall bar plus one bar per in-flight
/// symbol, rendered with `indicatif`.
pub struct TerminalProgress {
    multi: MultiProgress,
    inner: Mutex<TerminalState>,
}

#[derive(Default)]
struct TerminalState {
    overall: Option<ProgressBar>,
    bars: HashMap<String, ProgressBar>,
    symbols: HashMap<String, SymbolProgress>,
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            inner: Mutex::new(TerminalState::default()),
        }
    }

    fn overall_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner} {msg:20} [{bar:32}] {pos}/{len} ({elapsed} elapsed, eta {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
    }

    fn symbol_style() -> ProgressStyle {
        ProgressStyle::with_template("  {msg:20} [{bar:32}] {pos}/{len} chunks")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl ProgressTracker for TerminalProgress {
    fn start(&self, total_symbols: usize) {
        let bar = self.multi.add(ProgressBar::new(total_symbols as u64));
        bar.set_style(Self::overall_style());
        bar.set_message("Overall");

        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        state.overall = Some(bar);
    }

    fn start_symbol(&self, symbol: &str, total_chunks: usize) {
        let bar = self.multi.add(ProgressBar::new(total_chunks as u64));
        bar.set_style(Self::symbol_style());
        bar.set_message(symbol.to_string());

        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        state.bars.insert(symbol.to_string(), bar);
        state.symbols.insert(
            symbol.to_string(),
            SymbolProgress {
                total_chunks,
                status: SymbolStatus::Fetching,
                ..Default::default()
            },
        );
    }

    fn update_symbol(&self, symbol: &str, chunks_done: usize, rows_written: usize) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        if let Some(progress) = state.symbols.get_mut(symbol) {
            progress.completed_chunks += chunks_done;
            progress.rows_written += rows_written;
        }
        if let Some(bar) = state.bars.get(symbol) {
            bar.inc(chunks_done as u64);
        }
    }

    fn complete_symbol(&self, symbol: &str, success: bool) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        if let Some(progress) = state.symbols.get_mut(symbol) {
            progress.status = if success {
                SymbolStatus::Complete
            } else {
                SymbolStatus::Failed
            };
        }
        if let Some(bar) = state.bars.remove(symbol) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        if let Some(overall) = &state.overall {
            overall.inc(1);
        }
    }

    fn stop(&self) -> HashMap<String, SymbolProgress> {
        let Ok(mut state) = self.inner.lock() else {
            return HashMap::new();
        };
        if let Some(overall) = state.overall.take() {
            overall.finish_and_clear();
        }
        for (_, bar) in state.bars.drain() {
            bar.finish_and_clear();
        }
        state.symbols.clone()
    }
}
