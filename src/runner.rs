//! Warm-up and timed repetition of opaque kernel invocations.
//!
//! Devices may execute launches asynchronously, so every timed window ends
//! with the caller's synchronization barrier. Warm-up launches absorb deferred
//! compilation and allocation and are never timed.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BenchError, DeviceError, Result};
use crate::profiler::KernelProfiler;

/// Upper bound on up-front sample storage; longer runs grow the buffer.
const MAX_PREALLOCATED_SAMPLES: usize = 1 << 16;

/// Which part of a run an invocation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Warmup,
    Measured,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Warmup => write!(f, "warm-up"),
            Phase::Measured => write!(f, "measured"),
        }
    }
}

/// Handed to the kernel on every invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Launch {
    pub phase: Phase,
    /// Zero-based index within the phase.
    pub index: u64,
}

/// Wall-clock time of one measured invocation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimingSample {
    pub wall_clock_seconds: f64,
    pub iteration_index: u64,
}

/// Where the runner places synchronization barriers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Barrier inside every timed window.
    #[default]
    EachInvocation,
    /// One barrier after the last measured launch; its drain time is charged
    /// to the last sample.
    Batch,
}

type KernelFn<'a> = Box<dyn FnMut(Launch) -> std::result::Result<(), DeviceError> + 'a>;

/// A kernel plus the metadata the report needs.
pub struct KernelSpec<'a> {
    info: KernelInfo,
    invoke: KernelFn<'a>,
}

/// Descriptive half of a [`KernelSpec`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelInfo {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Inner loop bound of the kernel body (reduction length, escape limit).
    pub iterations: u64,
    /// Operations per invocation, when known (FLOPs, pixels).
    pub ops_per_invocation: Option<f64>,
    pub op_unit: String,
}

impl<'a> KernelSpec<'a> {
    pub fn new<F>(name: impl Into<String>, invoke: F) -> Self
    where
        F: FnMut(Launch) -> std::result::Result<(), DeviceError> + 'a,
    {
        Self {
            info: KernelInfo {
                name: name.into(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                iterations: 1,
                ops_per_invocation: None,
                op_unit: "op".to_string(),
            },
            invoke: Box::new(invoke),
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.info.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.info.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.info.iterations = iterations;
        self
    }

    pub fn with_ops(mut self, ops_per_invocation: f64, unit: impl Into<String>) -> Self {
        self.info.ops_per_invocation = Some(ops_per_invocation);
        self.info.op_unit = unit.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &KernelInfo {
        &self.info
    }

    fn invoke(&mut self, launch: Launch) -> std::result::Result<(), DeviceError> {
        (self.invoke)(launch)
    }
}

impl fmt::Debug for KernelSpec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSpec").field("info", &self.info).finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct KernelRunner {
    policy: SyncPolicy,
    profiler: Option<KernelProfiler>,
}

impl KernelRunner {
    pub fn new(policy: SyncPolicy) -> Self {
        Self {
            policy,
            profiler: None,
        }
    }

    pub fn with_profiler(mut self, profiler: KernelProfiler) -> Self {
        self.profiler = Some(profiler);
        self
    }

    pub fn profiler(&self) -> Option<&KernelProfiler> {
        self.profiler.as_ref()
    }

    /// Run `warmup_count` untimed launches, then `measured_count` timed ones.
    ///
    /// Returns one sample per measured launch in launch order. A launch or
    /// barrier failure aborts with [`BenchError::KernelExecutionFailed`]
    /// carrying the samples completed so far.
    pub fn run<S>(
        &mut self,
        kernel: &mut KernelSpec<'_>,
        warmup_count: u64,
        measured_count: u64,
        mut sync: S,
    ) -> Result<Vec<TimingSample>>
    where
        S: FnMut() -> std::result::Result<(), DeviceError>,
    {
        let name = kernel.name().to_string();
        let failed = |phase, index, partial, source| BenchError::KernelExecutionFailed {
            kernel: name.clone(),
            phase,
            index,
            partial,
            source,
        };

        debug!(kernel = %name, warmup_count, "warm-up");
        for index in 0..warmup_count {
            let launch = Launch {
                phase: Phase::Warmup,
                index,
            };
            if let Err(source) = kernel.invoke(launch) {
                return Err(failed(Phase::Warmup, index, Vec::new(), source));
            }
        }
        if let Err(source) = sync() {
            return Err(failed(
                Phase::Warmup,
                warmup_count.saturating_sub(1),
                Vec::new(),
                source,
            ));
        }

        debug!(kernel = %name, measured_count, policy = ?self.policy, "measuring");
        let capacity = usize::try_from(measured_count)
            .unwrap_or(usize::MAX)
            .min(MAX_PREALLOCATED_SAMPLES);
        let mut samples = Vec::with_capacity(capacity);
        for index in 0..measured_count {
            let launch = Launch {
                phase: Phase::Measured,
                index,
            };
            let start = Instant::now();
            if let Err(source) = kernel.invoke(launch) {
                return Err(failed(Phase::Measured, index, samples, source));
            }
            let barrier = match self.policy {
                SyncPolicy::EachInvocation => true,
                SyncPolicy::Batch => index + 1 == measured_count,
            };
            if barrier {
                if let Err(source) = sync() {
                    return Err(failed(Phase::Measured, index, samples, source));
                }
            }
            let elapsed = start.elapsed();

            if let Some(profiler) = self.profiler.as_mut() {
                profiler.record(&name, elapsed);
            }
            samples.push(TimingSample {
                wall_clock_seconds: elapsed.as_secs_f64(),
                iteration_index: index,
            });
        }

        Ok(samples)
    }
}
