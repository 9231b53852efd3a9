use std::path::PathBuf;

use serde_json::json;
use tracing::{info, warn};

use crate::backend::LaunchRange;
use crate::benches::BenchContext;
use crate::error::{BenchError, Result};
use crate::fixtures::{self, GenerateConfig, InputPattern, MatrixPair};
use crate::report::BenchmarkReport;
use crate::runner::KernelSpec;
use crate::verify::{Matrix, ReferenceVerifier, Verification};
use crate::{MatmulVariant, Workload};

pub const DEFAULT_SIZE: usize = 1024;
pub const DEFAULT_BLOCK: usize = 16;

#[derive(Clone, Debug)]
pub struct MatmulArgs {
    pub size: usize,
    pub variant: MatmulVariant,
    pub block: usize,
    pub pattern: InputPattern,
    /// Load operands from a `generate-inputs` file instead of generating.
    pub inputs: Option<PathBuf>,
}

impl Default for MatmulArgs {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            variant: MatmulVariant::Naive,
            block: DEFAULT_BLOCK,
            pattern: InputPattern::Random,
            inputs: None,
        }
    }
}

fn load_operands(ctx: &BenchContext, args: &MatmulArgs) -> Result<(MatrixPair, serde_json::Value)> {
    match &args.inputs {
        Some(path) => {
            let (meta, pair) = fixtures::load_inputs(path)?;
            info!(path = %path.display(), size = meta.size, "matmul: loaded inputs");
            let origin = json!({
                "inputs_file": path.to_string_lossy(),
                "pattern": meta.pattern.as_str(),
                "seed": meta.seed,
                "sha256": meta.digest_hex(),
            });
            Ok((pair, origin))
        }
        None => {
            let gen = GenerateConfig {
                size: args.size,
                seed: ctx.config.seed,
                pattern: args.pattern,
            };
            let origin = json!({
                "pattern": gen.pattern.as_str(),
                "seed": gen.seed,
            });
            Ok((fixtures::generate_inputs(&gen), origin))
        }
    }
}

fn tile_for(variant: MatmulVariant, block: usize, n: usize) -> Result<usize> {
    match variant {
        MatmulVariant::Naive => Ok(1),
        MatmulVariant::Blocked => {
            if block == 0 || n % block != 0 {
                return Err(BenchError::InvalidConfig(format!(
                    "block size {block} must divide matrix size {n}"
                )));
            }
            Ok(block)
        }
    }
}

pub fn run(ctx: &mut BenchContext, args: &MatmulArgs) -> Result<BenchmarkReport> {
    let (pair, origin) = load_operands(ctx, args)?;
    let n = pair.a.rows();
    if n == 0 {
        return Err(BenchError::InvalidConfig("matrix size must be at least 1".into()));
    }
    let tile = tile_for(args.variant, args.block, n)?;
    let warmup = ctx.config.warmup_iters(Workload::Matmul);
    let iters = ctx.config.iters(Workload::Matmul);
    let verifier = ReferenceVerifier::new(ctx.config.tolerance)?;

    let device = ctx.device.as_ref();
    let a = device.upload(pair.a.as_slice())?;
    let b = device.upload(pair.b.as_slice())?;
    let mut c = device.upload(&vec![0.0; n * n])?;

    info!(n, variant = args.variant.as_str(), warmup, iters, "matmul: running");
    let (info, samples) = {
        let (a, b) = (a.as_slice(), b.as_slice());
        let out = &mut c;
        let range = LaunchRange::new(n, n).tiled(tile);
        let name = format!("matmul.{}", args.variant.as_str());
        let mut kernel = KernelSpec::new(name, move |_| {
            device.launch_2d(range, &mut *out, &|i, j| {
                let mut sum = 0.0f32;
                for k in 0..n {
                    sum += a[i * n + k] * b[k * n + j];
                }
                sum
            })
        })
        .with_inputs(["A", "B"])
        .with_outputs(["C"])
        .with_iterations(n as u64)
        .with_ops(2.0 * (n as f64).powi(3), "FLOP");

        let samples = ctx.runner.run(&mut kernel, warmup, iters, || device.synchronize())?;
        (kernel.info().clone(), samples)
    };

    let product = Matrix::from_vec(n, n, device.download(&c)?)?;
    let result = verifier.verify(&product, (&pair.a, &pair.b))?;

    let mut warnings = Vec::new();
    if result.passed {
        info!(max_abs_error = result.max_abs_error, "matmul: verification passed");
    } else {
        let failure = BenchError::VerificationFailed {
            max_abs_error: result.max_abs_error,
            tolerance: result.tolerance,
        };
        warn!("{failure}");
        warnings.push(failure.to_string());
    }

    Ok(ctx.build_report(
        Workload::Matmul,
        info,
        samples,
        Verification::Checked(result),
        warnings,
        json!({
            "n": n,
            "variant": args.variant.as_str(),
            "block": tile,
            "inputs": origin,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naive_ignores_block_size() {
        assert_eq!(tile_for(MatmulVariant::Naive, 0, 7).unwrap(), 1);
    }

    #[test]
    fn blocked_requires_divisible_size() {
        assert_eq!(tile_for(MatmulVariant::Blocked, 4, 16).unwrap(), 4);
        assert!(tile_for(MatmulVariant::Blocked, 5, 16).is_err());
        assert!(tile_for(MatmulVariant::Blocked, 0, 16).is_err());
    }
}
