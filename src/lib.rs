use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub mod backend;
pub mod benches;
pub mod display;
pub mod error;
pub mod fixtures;
pub mod harness;
pub mod profiler;
pub mod report;
pub mod runner;
pub mod schema;
pub mod verify;

pub use error::{BenchError, DeviceError, DisplayError, Result};

/// Workload driven through the harness.
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workload {
    /// Pixel-wise Julia set fractal (no reference oracle).
    Fractal,
    /// Dense f32 matrix multiplication, verified against a host reference.
    Matmul,
}

impl Workload {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workload::Fractal => "fractal",
            Workload::Matmul => "matmul",
        }
    }
}

/// Matrix multiplication kernel variant.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatmulVariant {
    /// One output element per work item, row-parallel.
    #[default]
    Naive,
    /// Square output tiles of `--block` elements for memory locality.
    Blocked,
}

impl MatmulVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatmulVariant::Naive => "naive",
            MatmulVariant::Blocked => "blocked",
        }
    }
}
