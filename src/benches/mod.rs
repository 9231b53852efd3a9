//! Workloads driven through the harness.
//!
//! Each workload builds its kernel against the context's device, hands it to
//! the [`KernelRunner`], and turns the samples into a [`BenchmarkReport`].

pub mod matmul;

use tracing::info;

use crate::backend::{BackendProvider, BackendSelector, Device, Resolution};
use crate::error::Result;
use crate::harness::HarnessConfig;
use crate::profiler::KernelProfiler;
use crate::report::BenchmarkReport;
use crate::runner::{KernelInfo, KernelRunner, TimingSample};
use crate::verify::Verification;
use crate::Workload;

/// A resolved backend, its open device and the runner that drives it.
pub struct BenchContext {
    pub config: HarnessConfig,
    pub resolution: Resolution,
    pub device: Box<dyn Device>,
    pub runner: KernelRunner,
}

impl BenchContext {
    /// Resolve the configured backend (with fallback) and open its device.
    pub fn open(config: HarnessConfig, provider: &dyn BackendProvider) -> Result<Self> {
        let selector = BackendSelector::from_config(&config);
        let resolution = selector.resolve(&config.backend, |name| provider.probe_availability(name));
        let device = provider.open(&resolution.descriptor)?;
        info!(backend = %device.descriptor(), "device ready");

        let mut runner = KernelRunner::new(config.sync_policy);
        if config.profile_kernels {
            runner = runner.with_profiler(KernelProfiler::default());
        }
        Ok(Self {
            config,
            resolution,
            device,
            runner,
        })
    }

    /// Warnings every report from this context starts with.
    fn base_warnings(&self) -> Vec<String> {
        self.resolution
            .warning
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn build_report(
        &self,
        workload: Workload,
        kernel: KernelInfo,
        samples: Vec<TimingSample>,
        verification: Verification,
        mut warnings: Vec<String>,
        extra: serde_json::Value,
    ) -> BenchmarkReport {
        let mut all = self.base_warnings();
        all.append(&mut warnings);
        BenchmarkReport {
            workload: workload.as_str().to_string(),
            kernel,
            backend: self.device.descriptor().clone(),
            warmup_iters: self.config.warmup_iters(workload),
            samples,
            verification,
            warnings: all,
            extra,
        }
    }
}
