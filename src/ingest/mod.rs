pub mod orchestrator;
pub mod progress;

pub use orchestrator::IngestOrchestrator;
pub use progress::{ProgressTracker, SymbolProgress, SymbolStatus, TerminalProgress};
