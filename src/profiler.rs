//! Per-kernel launch statistics, printed on request.
//!
//! Purely informational: nothing in the report depends on it.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct KernelRecord {
    pub launches: u64,
    pub total_s: f64,
    pub min_s: f64,
    pub max_s: f64,
}

impl KernelRecord {
    pub fn mean_s(&self) -> f64 {
        if self.launches == 0 {
            0.0
        } else {
            self.total_s / self.launches as f64
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct KernelProfiler {
    records: BTreeMap<String, KernelRecord>,
}

impl KernelProfiler {
    pub fn record(&mut self, kernel: &str, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.records
            .entry(kernel.to_string())
            .and_modify(|r| {
                r.launches += 1;
                r.total_s += secs;
                r.min_s = r.min_s.min(secs);
                r.max_s = r.max_s.max(secs);
            })
            .or_insert(KernelRecord {
                launches: 1,
                total_s: secs,
                min_s: secs,
                max_s: secs,
            });
    }

    pub fn get(&self, kernel: &str) -> Option<&KernelRecord> {
        self.records.get(kernel)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fixed-width table, one row per kernel, sorted by name.
    pub fn summary_table(&self) -> String {
        let width = self
            .records
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max("kernel".len());

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<width$}  {:>8}  {:>12}  {:>12}  {:>12}  {:>12}",
            "kernel", "launches", "total ms", "mean ms", "min ms", "max ms"
        );
        for (name, r) in &self.records {
            let _ = writeln!(
                out,
                "{:<width$}  {:>8}  {:>12.3}  {:>12.3}  {:>12.3}  {:>12.3}",
                name,
                r.launches,
                r.total_s * 1e3,
                r.mean_s() * 1e3,
                r.min_s * 1e3,
                r.max_s * 1e3,
            );
        }
        out
    }
}
