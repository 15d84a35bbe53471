pub mod columns;
pub mod frame;
pub mod instrument;

pub use columns::OhlcvCol;
pub use instrument::Instrument;
