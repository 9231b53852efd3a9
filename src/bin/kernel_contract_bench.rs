use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kernel_contract_bench::backend::{BackendProvider, HostProvider};
use kernel_contract_bench::benches::fractal::{self, FractalArgs};
use kernel_contract_bench::benches::matmul::{self, MatmulArgs};
use kernel_contract_bench::benches::BenchContext;
use kernel_contract_bench::display::{Display, NullDisplay, PgmSnapshot};
use kernel_contract_bench::fixtures::{self, GenerateConfig, InputPattern};
use kernel_contract_bench::harness::{parse_device_param, HarnessConfig, Profile, DEFAULT_TOLERANCE};
use kernel_contract_bench::report::{BenchmarkReport, OutputFormat, ReportEmitter};
use kernel_contract_bench::runner::SyncPolicy;
use kernel_contract_bench::schema::{RunMeta, SCHEMA_VERSION};
use kernel_contract_bench::{BenchError, MatmulVariant, Result};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProfileArg {
    Quick,
    Full,
}

impl From<ProfileArg> for Profile {
    fn from(v: ProfileArg) -> Self {
        match v {
            ProfileArg::Quick => Profile::Quick,
            ProfileArg::Full => Profile::Full,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SyncArg {
    /// Barrier after every measured launch.
    Each,
    /// One barrier after the whole measured batch.
    Batch,
}

impl From<SyncArg> for SyncPolicy {
    fn from(v: SyncArg) -> Self {
        match v {
            SyncArg::Each => SyncPolicy::EachInvocation,
            SyncArg::Batch => SyncPolicy::Batch,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Julia set fractal, one launch per animation frame (no reference oracle).
    Fractal {
        /// Frame height; the width is twice this.
        #[arg(long, default_value_t = fractal::DEFAULT_N)]
        n: usize,

        /// Write the last frame as a PGM image.
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },

    /// Dense f32 matrix multiplication, verified against a host reference.
    Matmul {
        /// Matrix edge N (ignored with --inputs).
        #[arg(long, default_value_t = matmul::DEFAULT_SIZE)]
        size: usize,

        #[arg(long, value_enum, default_value_t = MatmulVariant::Naive)]
        variant: MatmulVariant,

        /// Tile edge for the blocked variant; must divide N.
        #[arg(long, default_value_t = matmul::DEFAULT_BLOCK)]
        block: usize,

        #[arg(long, value_enum, default_value_t = InputPattern::Random)]
        pattern: InputPattern,

        /// Operands written by `generate-inputs`.
        #[arg(long, value_name = "FILE")]
        inputs: Option<PathBuf>,
    },

    /// Run both workloads into one report.
    Suite {
        #[arg(long, default_value_t = matmul::DEFAULT_SIZE)]
        size: usize,

        #[arg(long, default_value_t = fractal::DEFAULT_N)]
        n: usize,

        #[arg(long, value_enum, default_value_t = MatmulVariant::Naive)]
        variant: MatmulVariant,

        #[arg(long, default_value_t = matmul::DEFAULT_BLOCK)]
        block: usize,
    },

    /// Write deterministic matmul operands to a file.
    GenerateInputs {
        #[arg(long, short = 'n', default_value_t = matmul::DEFAULT_SIZE)]
        size: usize,

        /// Output directory.
        #[arg(long, short = 'o', value_name = "DIR")]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = InputPattern::Random)]
        pattern: InputPattern,
    },

    /// Show the header of an inputs file.
    InputsInfo {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[command(name = "kernel-contract-bench")]
#[command(about = "Kernel benchmark runner with backend fallback and reference verification")]
struct Args {
    #[arg(long, value_enum, default_value_t = ProfileArg::Quick, global = true)]
    profile: ProfileArg,

    #[arg(long, default_value_t = 0, global = true)]
    seed: u64,

    /// Compute backend (cpu, serial, accel). Unavailable backends fall back to cpu.
    #[arg(long, env = "KCB_BACKEND", default_value = "cpu", global = true)]
    backend: String,

    /// Chip id for the accel backend.
    #[arg(long, env = "KCB_CHIP", default_value = "generic", global = true)]
    chip: String,

    /// Extra device parameter, KEY=VALUE. Repeatable.
    #[arg(long = "device-param", value_name = "KEY=VALUE", value_parser = parse_device_param, action = ArgAction::Append, global = true)]
    device_params: Vec<(String, String)>,

    /// Let unknown backend names fall back instead of rejecting them.
    #[arg(long, global = true)]
    allow_unknown_backend: bool,

    /// Untimed launches before measuring (default depends on workload/profile).
    #[arg(long, global = true)]
    warmup: Option<u64>,

    /// Measured launches (default depends on workload/profile).
    #[arg(long, global = true)]
    iters: Option<u64>,

    #[arg(long, value_enum, default_value_t = SyncArg::Each, global = true)]
    sync: SyncArg,

    /// Worker threads for the cpu backend.
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Max abs error accepted by the matmul reference check.
    #[arg(long, default_value_t = DEFAULT_TOLERANCE, global = true)]
    tolerance: f64,

    /// Print a per-kernel timing table to stderr.
    #[arg(long, global = true)]
    profile_kernels: bool,

    /// Exit non-zero when verification fails.
    #[arg(long, global = true)]
    fail_on_mismatch: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Where to write the report. If omitted, prints to stdout.
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Command,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn now_utc() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("unix:{secs}")
}

fn git_sha_short() -> Option<String> {
    std::env::var("GIT_SHA")
        .ok()
        .or_else(|| std::env::var("GITHUB_SHA").ok())
        .map(|s| s.chars().take(12).collect())
}

fn harness_config(args: &Args) -> HarnessConfig {
    HarnessConfig {
        profile: args.profile.into(),
        seed: args.seed,
        backend: args.backend.clone(),
        chip: args.chip.clone(),
        device_params: args.device_params.iter().cloned().collect::<BTreeMap<_, _>>(),
        allow_unknown_backend: args.allow_unknown_backend,
        warmup: args.warmup,
        iters: args.iters,
        sync_policy: args.sync.into(),
        threads: args.threads,
        tolerance: args.tolerance,
        profile_kernels: args.profile_kernels,
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = harness_config(&args);

    match &args.cmd {
        Command::GenerateInputs {
            size,
            output,
            pattern,
        } => {
            let gen = GenerateConfig {
                size: *size,
                seed: cfg.seed,
                pattern: *pattern,
            };
            fs::create_dir_all(output)?;
            let path = output.join(fixtures::inputs_file_name(&gen));

            eprintln!("Generating {size}x{size} operands (pattern={}, seed={})...", pattern.as_str(), gen.seed);
            let start = std::time::Instant::now();
            let pair = fixtures::generate_inputs(&gen);
            let meta = fixtures::write_inputs(&path, &pair, &gen)?;
            let file_size = fs::metadata(&path)?.len();
            eprintln!(
                "Wrote {:.2} MB in {:.2}s",
                file_size as f64 / 1_048_576.0,
                start.elapsed().as_secs_f64()
            );
            eprintln!("\nInputs saved: {}", path.display());
            eprintln!("  SHA-256: {}", meta.digest_hex());
            return Ok(());
        }
        Command::InputsInfo { path } => {
            let meta = fixtures::read_inputs_meta(path)?;
            eprintln!("Inputs: {}", path.display());
            eprintln!("  Size: {}x{}", meta.size, meta.size);
            eprintln!("  Pattern: {}", meta.pattern.as_str());
            eprintln!("  Seed: {}", meta.seed);
            eprintln!("  SHA-256: {}", meta.digest_hex());
            let file_size = fs::metadata(path)?.len();
            eprintln!("  File size: {:.2} MB", file_size as f64 / 1_048_576.0);
            return Ok(());
        }
        _ => {}
    }

    let provider = HostProvider::new(cfg.threads);
    cfg.validate(&provider.known_backends())?;
    let mut ctx = BenchContext::open(cfg.clone(), &provider)?;

    let mut reports: Vec<BenchmarkReport> = Vec::new();
    match &args.cmd {
        Command::Fractal { n, snapshot } => {
            let mut display: Box<dyn Display> = match snapshot {
                Some(path) => Box::new(PgmSnapshot::new(path)),
                None => Box::new(NullDisplay),
            };
            reports.push(fractal::run(&mut ctx, &FractalArgs { n: *n }, display.as_mut())?);
        }
        Command::Matmul {
            size,
            variant,
            block,
            pattern,
            inputs,
        } => {
            let m_args = MatmulArgs {
                size: *size,
                variant: *variant,
                block: *block,
                pattern: *pattern,
                inputs: inputs.clone(),
            };
            reports.push(matmul::run(&mut ctx, &m_args)?);
        }
        Command::Suite {
            size,
            n,
            variant,
            block,
        } => {
            reports.push(fractal::run(&mut ctx, &FractalArgs { n: *n }, &mut NullDisplay)?);
            let m_args = MatmulArgs {
                size: *size,
                variant: *variant,
                block: *block,
                ..Default::default()
            };
            reports.push(matmul::run(&mut ctx, &m_args)?);
        }
        Command::GenerateInputs { .. } | Command::InputsInfo { .. } => unreachable!(),
    }

    if let Some(profiler) = ctx.runner.profiler() {
        if !profiler.is_empty() {
            eprintln!("\nKernel profiling:\n{}", profiler.summary_table());
        }
    }

    let run_meta = RunMeta {
        schema_version: SCHEMA_VERSION,
        bench_version: env!("CARGO_PKG_VERSION").to_string(),
        profile: cfg.profile.as_str().to_string(),
        seed: cfg.seed,
        timestamp_utc: now_utc(),
        git_sha: git_sha_short(),
    };
    let rendered = ReportEmitter::new(args.format, run_meta).emit_all(&reports)?;
    if let Some(out) = &args.out {
        fs::write(out, rendered)?;
    } else {
        print!("{rendered}");
    }

    if args.fail_on_mismatch {
        let mismatch = reports
            .iter()
            .filter_map(|r| r.verification.result())
            .find(|r| !r.passed);
        if let Some(r) = mismatch {
            return Err(BenchError::VerificationFailed {
                max_abs_error: r.max_abs_error,
                tolerance: r.tolerance,
            });
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if !err.is_fatal() => {
            warn!("{err}");
            ExitCode::from(2)
        }
        Err(err) => {
            if let BenchError::KernelExecutionFailed { partial, .. } = &err {
                for s in partial {
                    error!(
                        iteration = s.iteration_index,
                        seconds = s.wall_clock_seconds,
                        "completed before failure"
                    );
                }
            }
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
