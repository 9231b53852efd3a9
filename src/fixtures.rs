//! Deterministic matrix inputs for the matmul workload.
//!
//! Inputs are either generated on the fly from a seed or loaded from a file
//! written by `generate-inputs`, so separate runs (and separate machines) can
//! multiply byte-identical operands.
//!
//! # Binary Format
//!
//! ```text
//! Header (96 bytes):
//!   magic: [u8; 8]     = b"KCB_MATX"
//!   version: u32       = 1
//!   pattern: u32       = InputPattern code
//!   size: u64          = matrix edge N
//!   seed: u64          = seed used for generation
//!   sha256: [u8; 32]   = digest of the body
//!   reserved: [u8; 32] = zeros
//!
//! Body:
//!   a: [f32; N*N]  row-major, little endian
//!   b: [f32; N*N]  row-major, little endian
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use clap::ValueEnum;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{BenchError, Result};
use crate::verify::Matrix;

const MAGIC: &[u8; 8] = b"KCB_MATX";

const FORMAT_VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 8 + 4 + 4 + 8 + 8 + 32 + 32;

/// How the A/B operands are filled.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPattern {
    /// Uniform values in [-1, 1) from a seeded ChaCha8 stream.
    #[default]
    Random,
    /// A = B = I.
    Identity,
    /// A = B = 2·I.
    DoubleIdentity,
    /// A[i,j] = i + j, B = 1.
    RowIndex,
}

impl InputPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputPattern::Random => "random",
            InputPattern::Identity => "identity",
            InputPattern::DoubleIdentity => "double_identity",
            InputPattern::RowIndex => "row_index",
        }
    }

    fn code(&self) -> u32 {
        match self {
            InputPattern::Random => 0,
            InputPattern::Identity => 1,
            InputPattern::DoubleIdentity => 2,
            InputPattern::RowIndex => 3,
        }
    }

    fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(InputPattern::Random),
            1 => Ok(InputPattern::Identity),
            2 => Ok(InputPattern::DoubleIdentity),
            3 => Ok(InputPattern::RowIndex),
            other => Err(BenchError::InvalidInput(format!("unknown pattern code {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub size: usize,
    pub seed: u64,
    pub pattern: InputPattern,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            size: 1024,
            seed: 42,
            pattern: InputPattern::Random,
        }
    }
}

/// Square operands for one multiplication.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixPair {
    pub a: Matrix,
    pub b: Matrix,
}

/// Metadata from an inputs file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputsMeta {
    pub size: u64,
    pub seed: u64,
    pub pattern: InputPattern,
    pub sha256: [u8; 32],
}

impl InputsMeta {
    pub fn digest_hex(&self) -> String {
        self.sha256.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn per_row_seed(master_seed: u64, row: usize) -> u64 {
    master_seed
        .wrapping_add(row as u64)
        .wrapping_mul(0x517cc1b727220a95)
}

/// Rows are seeded independently so generation parallelises without
/// changing the output.
fn random_matrix(n: usize, seed: u64, first_row: usize) -> Matrix {
    let data: Vec<f32> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            let mut rng = ChaCha8Rng::seed_from_u64(per_row_seed(seed, first_row + i));
            (0..n)
                .map(|_| rng.gen_range(-1.0f32..1.0))
                .collect::<Vec<_>>()
        })
        .collect();
    Matrix::from_row_major(n, n, data)
}

pub fn generate_inputs(config: &GenerateConfig) -> MatrixPair {
    let n = config.size;
    match config.pattern {
        InputPattern::Random => MatrixPair {
            a: random_matrix(n, config.seed, 0),
            b: random_matrix(n, config.seed, n),
        },
        InputPattern::Identity => MatrixPair {
            a: Matrix::identity(n),
            b: Matrix::identity(n),
        },
        InputPattern::DoubleIdentity => MatrixPair {
            a: Matrix::scaled_identity(n, 2.0),
            b: Matrix::scaled_identity(n, 2.0),
        },
        InputPattern::RowIndex => MatrixPair {
            a: Matrix::from_fn(n, n, |i, j| (i + j) as f32),
            b: Matrix::from_fn(n, n, |_, _| 1.0),
        },
    }
}

pub fn inputs_file_name(config: &GenerateConfig) -> String {
    format!(
        "matmul_{}_{}_seed{}.kcbm",
        config.size,
        config.pattern.as_str(),
        config.seed
    )
}

fn body_digest(pair: &MatrixPair) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for v in pair.a.as_slice().iter().chain(pair.b.as_slice()) {
        hasher.update(v.to_le_bytes());
    }
    hasher.finalize().into()
}

/// Write `pair` to `path`, returning the header that was written.
pub fn write_inputs<P: AsRef<Path>>(
    path: P,
    pair: &MatrixPair,
    config: &GenerateConfig,
) -> Result<InputsMeta> {
    let n = pair.a.rows();
    if !pair.a.is_square() || pair.b.rows() != n || pair.b.cols() != n {
        return Err(BenchError::ShapeMismatch(format!(
            "inputs must be square and equal-sized, got {}x{} and {}x{}",
            pair.a.rows(),
            pair.a.cols(),
            pair.b.rows(),
            pair.b.cols()
        )));
    }

    let meta = InputsMeta {
        size: n as u64,
        seed: config.seed,
        pattern: config.pattern,
        sha256: body_digest(pair),
    };

    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(64 * 1024, file);
    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&meta.pattern.code().to_le_bytes())?;
    writer.write_all(&meta.size.to_le_bytes())?;
    writer.write_all(&meta.seed.to_le_bytes())?;
    writer.write_all(&meta.sha256)?;
    writer.write_all(&[0u8; 32])?; // reserved
    for v in pair.a.as_slice().iter().chain(pair.b.as_slice()) {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(meta)
}

fn read_header<R: Read>(reader: &mut R) -> Result<InputsMeta> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(BenchError::InvalidInput(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {magic:?}"
        )));
    }

    let mut buf4 = [0u8; 4];
    let mut buf8 = [0u8; 8];

    reader.read_exact(&mut buf4)?;
    let version = u32::from_le_bytes(buf4);
    if version != FORMAT_VERSION {
        return Err(BenchError::InvalidInput(format!(
            "unsupported format version: {version}"
        )));
    }

    reader.read_exact(&mut buf4)?;
    let pattern = InputPattern::from_code(u32::from_le_bytes(buf4))?;

    reader.read_exact(&mut buf8)?;
    let size = u64::from_le_bytes(buf8);

    reader.read_exact(&mut buf8)?;
    let seed = u64::from_le_bytes(buf8);

    let mut sha256 = [0u8; 32];
    reader.read_exact(&mut sha256)?;

    let mut reserved = [0u8; 32];
    reader.read_exact(&mut reserved)?;

    Ok(InputsMeta {
        size,
        seed,
        pattern,
        sha256,
    })
}

pub fn read_inputs_meta<P: AsRef<Path>>(path: P) -> Result<InputsMeta> {
    let mut reader = BufReader::new(File::open(path)?);
    read_header(&mut reader)
}

/// Load and digest-check an inputs file.
pub fn load_inputs<P: AsRef<Path>>(path: P) -> Result<(InputsMeta, MatrixPair)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let meta = read_header(&mut reader)?;

    let too_large = || BenchError::InvalidInput(format!("size {} too large", meta.size));
    let expected = expected_file_size(meta.size).ok_or_else(too_large)?;
    if file_len != expected {
        return Err(BenchError::InvalidInput(format!(
            "file is {file_len} bytes, a {0}x{0} inputs file is {expected}",
            meta.size
        )));
    }
    let n = usize::try_from(meta.size).map_err(|_| too_large())?;
    let matrix_bytes = n
        .checked_mul(n)
        .and_then(|e| e.checked_mul(4))
        .ok_or_else(too_large)?;
    let read_matrix = |reader: &mut BufReader<File>| -> Result<Matrix> {
        let mut bytes = vec![0u8; matrix_bytes];
        reader.read_exact(&mut bytes)?;
        let data = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Matrix::from_vec(n, n, data)
    };
    let a = read_matrix(&mut reader)?;
    let b = read_matrix(&mut reader)?;
    let pair = MatrixPair { a, b };

    if body_digest(&pair) != meta.sha256 {
        return Err(BenchError::InvalidInput(
            "body digest does not match header".into(),
        ));
    }
    Ok((meta, pair))
}

/// Expected file size for an `n`×`n` inputs file, `None` if it overflows.
pub fn expected_file_size(n: u64) -> Option<u64> {
    n.checked_mul(n)?
        .checked_mul(2 * 4)?
        .checked_add(HEADER_SIZE as u64)
}
