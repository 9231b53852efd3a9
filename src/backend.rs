//! Compute backends and deterministic backend resolution.
//!
//! The harness talks to compute targets through two seams:
//!
//! - [`BackendProvider`] answers "is this backend usable here?" and opens a
//!   [`Device`] for a resolved descriptor.
//! - [`Device`] launches 2-D range kernels, moves buffers between host and
//!   device, and drains its queue on [`Device::synchronize`].
//!
//! [`HostProvider`] ships two host backends: `cpu` (rayon pool, always
//! available, the fallback) and `serial` (one thread). The `accel` backend
//! names an external chip runtime that is not linked into this build, so it
//! always probes unavailable and runs fall back to `cpu`.

use std::collections::BTreeMap;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BenchError, DeviceError, Result};
use crate::harness::HarnessConfig;

pub const CPU_BACKEND: &str = "cpu";
pub const SERIAL_BACKEND: &str = "serial";
pub const ACCEL_BACKEND: &str = "accel";

/// Chip ids accepted by the `accel` backend.
pub const ACCEL_CHIPS: &[&str] = &[
    "mlu370",
    "mlu590",
    "ascend910",
    "ascend310",
    "dcu",
    "gcu",
    "generic",
];

pub const DEFAULT_CHIP: &str = "generic";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub available: bool,
    pub device_params: BTreeMap<String, String>,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, available: bool) -> Self {
        Self {
            name: name.into(),
            available,
            device_params: BTreeMap::new(),
        }
    }

    /// The always-available host backend.
    pub fn cpu() -> Self {
        Self::new(CPU_BACKEND, true)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.device_params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.device_params.get(key).map(String::as_str)
    }
}

impl fmt::Display for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.device_params.is_empty() {
            let params: Vec<String> = self
                .device_params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " ({})", params.join(", "))?;
        }
        Ok(())
    }
}

/// Outcome of [`BackendSelector::resolve`].
#[derive(Debug)]
pub struct Resolution {
    pub descriptor: BackendDescriptor,
    /// `BackendUnavailable` when the request could not be honoured.
    pub warning: Option<BenchError>,
}

impl Resolution {
    pub fn fell_back(&self) -> bool {
        self.warning.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct BackendSelector {
    fallback: BackendDescriptor,
    device_params: BTreeMap<String, String>,
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new(BackendDescriptor::cpu())
    }
}

impl BackendSelector {
    pub fn new(fallback: BackendDescriptor) -> Self {
        Self {
            fallback,
            device_params: BTreeMap::new(),
        }
    }

    pub fn from_config(cfg: &HarnessConfig) -> Self {
        Self::default().with_device_params(cfg.device_params())
    }

    pub fn with_device_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.device_params = params;
        self
    }

    /// Resolve `requested` against `probe`, falling back when it is unusable.
    ///
    /// The probe runs at most once and never for an empty name. Unknown and
    /// unavailable names are handled the same way: the fallback descriptor is
    /// returned together with a `BackendUnavailable` warning.
    pub fn resolve<P>(&self, requested: &str, probe: P) -> Resolution
    where
        P: FnOnce(&str) -> bool,
    {
        let requested = requested.trim();
        let available = !requested.is_empty() && probe(requested);

        if available {
            info!(backend = requested, "backend available");
            return Resolution {
                descriptor: BackendDescriptor {
                    name: requested.to_string(),
                    available: true,
                    device_params: self.device_params.clone(),
                },
                warning: None,
            };
        }

        let shown = if requested.is_empty() {
            "<empty>"
        } else {
            requested
        };
        let warning = BenchError::BackendUnavailable {
            requested: shown.to_string(),
            fallback: self.fallback.name.clone(),
        };
        warn!("{warning}");
        Resolution {
            descriptor: self.fallback.clone(),
            warning: Some(warning),
        }
    }
}

/// Eager check of a requested backend name against the known registry.
pub fn validate_backend_name(name: &str, known: &[String]) -> Result<()> {
    if known.iter().any(|k| k == name) {
        Ok(())
    } else {
        Err(BenchError::UnknownBackend {
            name: name.to_string(),
            known: known.to_vec(),
        })
    }
}

pub fn validate_chip(chip: &str) -> Result<()> {
    if ACCEL_CHIPS.contains(&chip) {
        Ok(())
    } else {
        Err(BenchError::UnknownChip {
            name: chip.to_string(),
            known: ACCEL_CHIPS.iter().map(|c| c.to_string()).collect(),
        })
    }
}

/// Index space of a 2-D launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchRange {
    pub rows: usize,
    pub cols: usize,
    /// Square tile edge; `1` means plain row-parallel iteration.
    pub tile: usize,
}

impl LaunchRange {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, tile: 1 }
    }

    pub fn tiled(mut self, tile: usize) -> Self {
        self.tile = tile.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Device-resident f32 buffer. Host backends keep it in host memory.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceBuffer {
    data: Vec<f32>,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access for kernel bodies running on a host backend.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

pub type KernelBody<'a> = dyn Fn(usize, usize) -> f32 + Sync + 'a;

pub trait Device: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    /// Host to device copy.
    fn upload(&self, host: &[f32]) -> std::result::Result<DeviceBuffer, DeviceError>;

    /// Device to host copy.
    fn download(&self, buffer: &DeviceBuffer) -> std::result::Result<Vec<f32>, DeviceError>;

    /// Evaluate `body(row, col)` for every point of `range` into `out`
    /// (row-major). May return before the work completes.
    fn launch_2d(
        &self,
        range: LaunchRange,
        out: &mut DeviceBuffer,
        body: &KernelBody<'_>,
    ) -> std::result::Result<(), DeviceError>;

    /// Block until every launch issued so far has completed.
    fn synchronize(&self) -> std::result::Result<(), DeviceError>;
}

pub trait BackendProvider {
    /// Backend names this provider recognises, usable or not.
    fn known_backends(&self) -> Vec<String>;

    fn probe_availability(&self, name: &str) -> bool;

    fn open(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn Device>>;
}

/// Provider for the backends built into this crate.
#[derive(Clone, Debug, Default)]
pub struct HostProvider {
    threads: Option<usize>,
}

impl HostProvider {
    pub fn new(threads: Option<usize>) -> Self {
        Self { threads }
    }
}

impl BackendProvider for HostProvider {
    fn known_backends(&self) -> Vec<String> {
        [CPU_BACKEND, SERIAL_BACKEND, ACCEL_BACKEND]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn probe_availability(&self, name: &str) -> bool {
        matches!(name, CPU_BACKEND | SERIAL_BACKEND)
    }

    fn open(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn Device>> {
        match descriptor.name.as_str() {
            CPU_BACKEND => Ok(Box::new(CpuDevice::new(descriptor.clone(), self.threads)?)),
            SERIAL_BACKEND => Ok(Box::new(SerialDevice::new(descriptor.clone()))),
            other => Err(DeviceError::Init(format!("no runtime linked for backend `{other}`")).into()),
        }
    }
}

/// Multi-threaded host backend on a dedicated rayon pool.
pub struct CpuDevice {
    descriptor: BackendDescriptor,
    pool: rayon::ThreadPool,
}

impl CpuDevice {
    pub fn new(
        descriptor: BackendDescriptor,
        threads: Option<usize>,
    ) -> std::result::Result<Self, DeviceError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("kcb-cpu-{i}"));
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| DeviceError::Init(e.to_string()))?;
        let descriptor = descriptor.with_param("threads", pool.current_num_threads().to_string());
        Ok(Self { descriptor, pool })
    }
}

impl Device for CpuDevice {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn upload(&self, host: &[f32]) -> std::result::Result<DeviceBuffer, DeviceError> {
        Ok(DeviceBuffer {
            data: host.to_vec(),
        })
    }

    fn download(&self, buffer: &DeviceBuffer) -> std::result::Result<Vec<f32>, DeviceError> {
        Ok(buffer.data.clone())
    }

    fn launch_2d(
        &self,
        range: LaunchRange,
        out: &mut DeviceBuffer,
        body: &KernelBody<'_>,
    ) -> std::result::Result<(), DeviceError> {
        check_launch(range, out)?;
        if range.is_empty() {
            return Ok(());
        }
        let band = range.cols * range.tile;
        self.pool.install(|| {
            out.data
                .par_chunks_mut(band)
                .enumerate()
                .for_each(|(b, chunk)| fill_band(chunk, b * range.tile, range, body));
        });
        Ok(())
    }

    // Launches complete inside `install`, so the queue is already drained.
    fn synchronize(&self) -> std::result::Result<(), DeviceError> {
        Ok(())
    }
}

/// Single-threaded host backend.
pub struct SerialDevice {
    descriptor: BackendDescriptor,
}

impl SerialDevice {
    pub fn new(descriptor: BackendDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Device for SerialDevice {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn upload(&self, host: &[f32]) -> std::result::Result<DeviceBuffer, DeviceError> {
        Ok(DeviceBuffer {
            data: host.to_vec(),
        })
    }

    fn download(&self, buffer: &DeviceBuffer) -> std::result::Result<Vec<f32>, DeviceError> {
        Ok(buffer.data.clone())
    }

    fn launch_2d(
        &self,
        range: LaunchRange,
        out: &mut DeviceBuffer,
        body: &KernelBody<'_>,
    ) -> std::result::Result<(), DeviceError> {
        check_launch(range, out)?;
        if range.is_empty() {
            return Ok(());
        }
        let band = range.cols * range.tile;
        for (b, chunk) in out.data.chunks_mut(band).enumerate() {
            fill_band(chunk, b * range.tile, range, body);
        }
        Ok(())
    }

    fn synchronize(&self) -> std::result::Result<(), DeviceError> {
        Ok(())
    }
}

fn check_launch(range: LaunchRange, out: &DeviceBuffer) -> std::result::Result<(), DeviceError> {
    if out.len() != range.len() {
        return Err(DeviceError::BufferSize {
            expected: range.len(),
            actual: out.len(),
        });
    }
    Ok(())
}

/// Fill one band of `range.tile` rows starting at `first_row`, walking it in
/// square tiles so neighbouring outputs are produced together.
fn fill_band(chunk: &mut [f32], first_row: usize, range: LaunchRange, body: &KernelBody<'_>) {
    let cols = range.cols;
    let rows = chunk.len() / cols;
    let tile = range.tile;
    let mut col0 = 0;
    while col0 < cols {
        let col1 = (col0 + tile).min(cols);
        for r in 0..rows {
            let row = &mut chunk[r * cols..(r + 1) * cols];
            for (c, v) in row.iter_mut().enumerate().take(col1).skip(col0) {
                *v = body(first_row + r, c);
            }
        }
        col0 = col1;
    }
}
