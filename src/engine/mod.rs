pub mod bus;
pub mod events;
pub mod execution;
pub mod mtf;
pub mod portfolio;
pub mod vector;

pub use bus::{EventEngine, EventHandler, EventQueue};
pub use events::{Direction, Event, FillEvent, MarketEvent, OrderEvent, SignalEvent, SignalKind};
pub use execution::VolumeAwareExecutionHandler;
pub use portfolio::{Portfolio, RiskParams, SizingMethod};
pub use vector::VectorEngine;
