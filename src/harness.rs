use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::{validate_backend_name, validate_chip, ACCEL_BACKEND, CPU_BACKEND, DEFAULT_CHIP};
use crate::error::{BenchError, Result};
use crate::runner::SyncPolicy;
use crate::Workload;

/// Default reference tolerance for the matrix workload.
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Quick,
    Full,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Quick => "quick",
            Profile::Full => "full",
        }
    }
}

/// Everything a run needs, passed explicitly to the selector and runner.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    pub profile: Profile,
    pub seed: u64,
    /// Requested backend name; resolved with fallback at run time.
    pub backend: String,
    /// Target chip for the `accel` backend.
    pub chip: String,
    pub device_params: BTreeMap<String, String>,
    /// Skip eager name validation and let unknown names fall back.
    pub allow_unknown_backend: bool,
    /// Overrides for the profile's warm-up/measured counts.
    pub warmup: Option<u64>,
    pub iters: Option<u64>,
    pub sync_policy: SyncPolicy,
    /// Worker threads for the `cpu` backend; `None` uses every core.
    pub threads: Option<usize>,
    pub tolerance: f64,
    pub profile_kernels: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Quick,
            seed: 0,
            backend: CPU_BACKEND.to_string(),
            chip: DEFAULT_CHIP.to_string(),
            device_params: BTreeMap::new(),
            allow_unknown_backend: false,
            warmup: None,
            iters: None,
            sync_policy: SyncPolicy::EachInvocation,
            threads: None,
            tolerance: DEFAULT_TOLERANCE,
            profile_kernels: false,
        }
    }
}

impl HarnessConfig {
    /// Requested backend with surrounding whitespace removed, as resolution sees it.
    pub fn backend_name(&self) -> &str {
        self.backend.trim()
    }

    pub fn warmup_iters(&self, workload: Workload) -> u64 {
        if let Some(n) = self.warmup {
            return n;
        }
        match (self.profile, workload) {
            (Profile::Quick, _) => 1,
            (Profile::Full, Workload::Fractal) => 10,
            (Profile::Full, Workload::Matmul) => 2,
        }
    }

    pub fn iters(&self, workload: Workload) -> u64 {
        if let Some(n) = self.iters {
            return n;
        }
        match (self.profile, workload) {
            (Profile::Quick, Workload::Fractal) => 100,
            (Profile::Quick, Workload::Matmul) => 1,
            (Profile::Full, Workload::Fractal) => 1_000,
            (Profile::Full, Workload::Matmul) => 5,
        }
    }

    /// Device parameters attached to the resolved descriptor.
    ///
    /// The chip id only means something to the accelerator backend, so it is
    /// added for `accel` alone; explicit `--device-param` entries win.
    pub fn device_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if self.backend_name() == ACCEL_BACKEND {
            params.insert("chip".to_string(), self.chip.clone());
        }
        if let Some(threads) = self.threads {
            params.insert("threads".to_string(), threads.to_string());
        }
        params.extend(self.device_params.clone());
        params
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self, known_backends: &[String]) -> Result<()> {
        if self.iters == Some(0) {
            return Err(BenchError::InvalidConfig(
                "measured iteration count must be at least 1".into(),
            ));
        }
        if self.threads == Some(0) {
            return Err(BenchError::InvalidConfig("--threads must be at least 1".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(BenchError::InvalidConfig(format!(
                "tolerance must be a finite value >= 0, got {}",
                self.tolerance
            )));
        }
        let backend = self.backend_name();
        if !self.allow_unknown_backend && !backend.is_empty() {
            validate_backend_name(backend, known_backends)?;
            if backend == ACCEL_BACKEND {
                validate_chip(&self.chip)?;
            }
        }
        Ok(())
    }
}

/// Parse a `key=value` device parameter.
pub fn parse_device_param(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        vec!["cpu".into(), "serial".into(), "accel".into()]
    }

    #[test]
    fn quick_profile_uses_workload_defaults() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.warmup_iters(Workload::Fractal), 1);
        assert_eq!(cfg.iters(Workload::Fractal), 100);
        assert_eq!(cfg.warmup_iters(Workload::Matmul), 1);
        assert_eq!(cfg.iters(Workload::Matmul), 1);
    }

    #[test]
    fn explicit_counts_override_profile() {
        let cfg = HarnessConfig {
            profile: Profile::Full,
            warmup: Some(0),
            iters: Some(7),
            ..Default::default()
        };
        assert_eq!(cfg.warmup_iters(Workload::Matmul), 0);
        assert_eq!(cfg.iters(Workload::Fractal), 7);
    }

    #[test]
    fn chip_only_attached_for_accel() {
        let cpu = HarnessConfig::default();
        assert!(!cpu.device_params().contains_key("chip"));

        let accel = HarnessConfig {
            backend: "accel".into(),
            chip: "mlu370".into(),
            ..Default::default()
        };
        assert_eq!(accel.device_params().get("chip").map(String::as_str), Some("mlu370"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let zero = HarnessConfig {
            iters: Some(0),
            ..Default::default()
        };
        assert!(matches!(zero.validate(&known()), Err(BenchError::InvalidConfig(_))));

        let tol = HarnessConfig {
            tolerance: -1.0,
            ..Default::default()
        };
        assert!(matches!(tol.validate(&known()), Err(BenchError::InvalidConfig(_))));

        let name = HarnessConfig {
            backend: "tpu".into(),
            ..Default::default()
        };
        assert!(matches!(name.validate(&known()), Err(BenchError::UnknownBackend { .. })));

        let chip = HarnessConfig {
            backend: "accel".into(),
            chip: "h100".into(),
            ..Default::default()
        };
        assert!(matches!(chip.validate(&known()), Err(BenchError::UnknownChip { .. })));
    }

    #[test]
    fn backend_name_is_trimmed_before_validation() {
        let cfg = HarnessConfig {
            backend: " cpu ".into(),
            ..Default::default()
        };
        assert_eq!(cfg.backend_name(), "cpu");
        assert!(cfg.validate(&known()).is_ok());

        let accel = HarnessConfig {
            backend: "accel\t".into(),
            chip: "dcu".into(),
            ..Default::default()
        };
        assert!(accel.validate(&known()).is_ok());
        assert_eq!(accel.device_params().get("chip").map(String::as_str), Some("dcu"));
    }

    #[test]
    fn permissive_mode_skips_name_validation() {
        let cfg = HarnessConfig {
            backend: "tpu".into(),
            allow_unknown_backend: true,
            ..Default::default()
        };
        assert!(cfg.validate(&known()).is_ok());
    }

    #[test]
    fn device_param_parsing() {
        assert_eq!(
            parse_device_param("queue = 2").unwrap(),
            ("queue".to_string(), "2".to_string())
        );
        assert!(parse_device_param("novalue").is_err());
        assert!(parse_device_param("=x").is_err());
    }
}
