//! Benchmark reports and their text/JSON rendering.

use std::fmt::Write as _;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::backend::BackendDescriptor;
use crate::error::Result;
use crate::runner::{KernelInfo, TimingSample};
use crate::schema::{ContractBenchReport, Measurement, RunMeta};
use crate::verify::Verification;

/// Derived timing statistics over the measured samples, in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub count: u64,
    pub total_s: f64,
    pub mean_s: f64,
    pub min_s: f64,
    pub max_s: f64,
    pub p50_s: f64,
    pub p95_s: f64,
}

pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

impl TimingStats {
    pub fn from_samples(samples: &[TimingSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted: Vec<f64> = samples.iter().map(|s| s.wall_clock_seconds).collect();
        sorted.sort_by(f64::total_cmp);
        let total_s: f64 = sorted.iter().sum();
        Self {
            count: samples.len() as u64,
            total_s,
            mean_s: total_s / samples.len() as f64,
            min_s: sorted[0],
            max_s: sorted[sorted.len() - 1],
            p50_s: quantile(&sorted, 0.50),
            p95_s: quantile(&sorted, 0.95),
        }
    }
}

/// Everything one benchmark run produced. Built once at the end of the run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub workload: String,
    pub kernel: KernelInfo,
    pub backend: BackendDescriptor,
    pub warmup_iters: u64,
    pub samples: Vec<TimingSample>,
    pub verification: Verification,
    /// Recoverable conditions hit during the run, in order.
    pub warnings: Vec<String>,
    pub extra: serde_json::Value,
}

impl BenchmarkReport {
    pub fn stats(&self) -> TimingStats {
        TimingStats::from_samples(&self.samples)
    }

    /// Operations per second at the mean iteration time.
    pub fn throughput(&self) -> Option<f64> {
        let ops = self.kernel.ops_per_invocation?;
        let mean = self.stats().mean_s;
        (mean > 0.0).then(|| ops / mean)
    }

    pub fn to_measurement(&self) -> Measurement {
        let stats = self.stats();
        let total_ns = self
            .samples
            .iter()
            .map(|s| (s.wall_clock_seconds * 1e9).round() as u128)
            .sum();
        Measurement {
            name: self.kernel.name.clone(),
            unit: "ns/iter".to_string(),
            backend: self.backend.clone(),
            iters: stats.count,
            warmup_iters: self.warmup_iters,
            total_ns,
            ns_per_iter: stats.mean_s * 1e9,
            stats,
            samples_s: self.samples.iter().map(|s| s.wall_clock_seconds).collect(),
            ops_per_iter: self.kernel.ops_per_invocation,
            op_unit: self.kernel.op_unit.clone(),
            throughput_ops_per_s: self.throughput(),
            verification: self.verification,
            warnings: self.warnings.clone(),
            extra: self.extra.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// `ContractBenchReport` JSON document.
    Json,
}

/// Renders reports. Holds no mutable state, so repeated calls on the same
/// input produce the same output.
#[derive(Clone, Debug)]
pub struct ReportEmitter {
    format: OutputFormat,
    run: RunMeta,
}

impl ReportEmitter {
    pub fn new(format: OutputFormat, run: RunMeta) -> Self {
        Self { format, run }
    }

    pub fn emit(&self, report: &BenchmarkReport) -> Result<String> {
        self.emit_all(std::slice::from_ref(report))
    }

    pub fn emit_all(&self, reports: &[BenchmarkReport]) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let doc = ContractBenchReport {
                    run: self.run.clone(),
                    measurements: reports.iter().map(BenchmarkReport::to_measurement).collect(),
                };
                Ok(serde_json::to_string_pretty(&doc)?)
            }
            OutputFormat::Text => {
                let mut out = String::new();
                let _ = writeln!(
                    out,
                    "kernel-contract-bench {} (profile={}, seed={})",
                    self.run.bench_version, self.run.profile, self.run.seed
                );
                for report in reports {
                    out.push('\n');
                    render_text(&mut out, report);
                }
                Ok(out)
            }
        }
    }
}

fn render_text(out: &mut String, report: &BenchmarkReport) {
    let stats = report.stats();
    let _ = writeln!(out, "== {} on {}", report.kernel.name, report.backend);
    let _ = writeln!(out, "  warm-up:      {}", report.warmup_iters);
    let _ = writeln!(out, "  iterations:   {}", stats.count);
    let _ = writeln!(out, "  total:        {:.6} s", stats.total_s);
    let _ = writeln!(out, "  mean:         {:.3} ms/iter", stats.mean_s * 1e3);
    let _ = writeln!(
        out,
        "  min / max:    {:.3} / {:.3} ms",
        stats.min_s * 1e3,
        stats.max_s * 1e3
    );
    let _ = writeln!(
        out,
        "  p50 / p95:    {:.3} / {:.3} ms",
        stats.p50_s * 1e3,
        stats.p95_s * 1e3
    );
    let throughput = match report.throughput() {
        Some(rate) => format_rate(rate, &report.kernel.op_unit),
        None => "N/A".to_string(),
    };
    let _ = writeln!(out, "  throughput:   {throughput}");
    let verification = match report.verification {
        Verification::NotApplicable => "N/A".to_string(),
        Verification::Checked(r) => format!(
            "{} (max abs error {:.3e}, tolerance {:.1e})",
            if r.passed { "passed" } else { "FAILED" },
            r.max_abs_error,
            r.tolerance
        ),
    };
    let _ = writeln!(out, "  verification: {verification}");
    for w in &report.warnings {
        let _ = writeln!(out, "  warning:      {w}");
    }
}

/// `4.2e9, "FLOP"` -> `"4.20 GFLOP/s"`.
pub fn format_rate(per_second: f64, unit: &str) -> String {
    const PREFIXES: [(f64, &str); 4] = [(1e12, "T"), (1e9, "G"), (1e6, "M"), (1e3, "k")];
    for (scale, prefix) in PREFIXES {
        if per_second >= scale {
            return format!("{:.2} {prefix}{unit}/s", per_second / scale);
        }
    }
    format!("{per_second:.2} {unit}/s")
}
