mod config;
mod context;
mod driver;
mod error;
mod model;
pub mod models;
pub mod trace;

#[cfg(feature = "trace")]
pub mod fst;
#[cfg(feature = "verilator")]
pub mod verilated;

// Re-export public API
pub use config::{CONFIG_FILE, DriverConfig, Preset, TraceConfig};
pub use context::SimContext;
pub use driver::{Driver, RunSummary};
pub use error::{Result, SimError};
pub use model::Model;
pub use trace::{DefaultTracer, NullTracer, Tracer};
