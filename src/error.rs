//! Error taxonomy for the harness.
//!
//! Only [`BenchError::KernelExecutionFailed`] aborts a benchmark run. Backend
//! fallback, missing displays and verification mismatches are recorded on the
//! report and logged, never retried.

use std::io;

use thiserror::Error;

use crate::runner::{Phase, TimingSample};

/// Failures raised by a compute device while launching or draining work.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("kernel launch failed: {0}")]
    Launch(String),

    #[error("device synchronization failed: {0}")]
    Sync(String),

    #[error("buffer holds {actual} elements, launch needs {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("device initialization failed: {0}")]
    Init(String),
}

/// Failures of the optional display collaborator.
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("no display attached")]
    NotAttached,

    #[error("frame is {width}x{height} but holds {len} pixels")]
    FrameSize {
        width: usize,
        height: usize,
        len: usize,
    },

    #[error("display write failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("backend `{requested}` unavailable, falling back to `{fallback}`")]
    BackendUnavailable { requested: String, fallback: String },

    #[error("unknown backend `{name}` (known: {})", .known.join(", "))]
    UnknownBackend { name: String, known: Vec<String> },

    #[error("unknown chip `{name}` (known: {})", .known.join(", "))]
    UnknownChip { name: String, known: Vec<String> },

    #[error(
        "kernel `{kernel}` failed at {phase} invocation {index} after {} measured samples: {source}",
        .partial.len()
    )]
    KernelExecutionFailed {
        kernel: String,
        phase: Phase,
        index: u64,
        partial: Vec<TimingSample>,
        #[source]
        source: DeviceError,
    },

    #[error("visualization unavailable: {0}")]
    VisualizationUnavailable(#[from] DisplayError),

    #[error("verification failed: max abs error {max_abs_error:e} exceeds tolerance {tolerance:e}")]
    VerificationFailed { max_abs_error: f64, tolerance: f64 },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input file: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    /// Whether the error aborts the current benchmark run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BenchError::BackendUnavailable { .. }
                | BenchError::VisualizationUnavailable(_)
                | BenchError::VerificationFailed { .. }
        )
    }

    /// Samples completed before a kernel failure, if any.
    pub fn partial_samples(&self) -> Option<&[TimingSample]> {
        match self {
            BenchError::KernelExecutionFailed { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;
