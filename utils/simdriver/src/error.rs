//! Error types for the simulation driver.

use std::io;

use camino::Utf8PathBuf;

/// Errors raised while running a model or writing its waveform.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Waveform file could not be created, written or flushed.
    #[error("waveform I/O error: {0}")]
    TraceIo(#[from] io::Error),

    /// A waveform file did not have the expected block structure.
    #[error("malformed waveform: {reason}")]
    TraceFormat { reason: String },

    /// A traced signal was declared with an unsupported width.
    #[error("signal `{name}` has unsupported width {width} (expected 1..=64)")]
    InvalidSignal { name: String, width: u32 },

    /// `dump` or `close` called on a tracer that was never opened.
    #[error("tracer is not open")]
    TraceNotOpen,

    /// The generated model could not be constructed.
    #[error("failed to create model: {reason}")]
    ModelInit { reason: String },

    /// The driver configuration file could not be read or parsed.
    #[error("invalid configuration {path}: {reason}")]
    Config { path: Utf8PathBuf, reason: String },
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
