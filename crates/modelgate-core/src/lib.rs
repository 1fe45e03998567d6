pub mod config;
pub mod types;

pub use config::{GateConfig, SignalKind, parse_duration};
pub use types::*;
