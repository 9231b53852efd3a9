use serde::{Deserialize, Serialize};

use crate::backend::BackendDescriptor;
use crate::report::TimingStats;
use crate::verify::Verification;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub schema_version: u32,
    pub bench_version: String,
    pub profile: String,
    pub seed: u64,
    pub timestamp_utc: String,
    pub git_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub unit: String,
    pub backend: BackendDescriptor,

    pub iters: u64,
    pub warmup_iters: u64,

    pub total_ns: u128,
    pub ns_per_iter: f64,
    pub stats: TimingStats,
    pub samples_s: Vec<f64>,

    pub ops_per_iter: Option<f64>,
    pub op_unit: String,
    pub throughput_ops_per_s: Option<f64>,

    pub verification: Verification,
    pub warnings: Vec<String>,

    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractBenchReport {
    pub run: RunMeta,
    pub measurements: Vec<Measurement>,
}
