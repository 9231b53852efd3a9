//! Optional frame display for the fractal workload.
//!
//! Displays are capability-checked collaborators: a missing or failing
//! display is reported as `VisualizationUnavailable` and never touches the
//! benchmark path.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{BenchError, DisplayError};

/// Grey-scale frame, row-major, intensities in `[0, 1]`.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    pub width: usize,
    pub height: usize,
    pub pixels: &'a [f32],
}

impl Frame<'_> {
    fn check(&self) -> Result<(), DisplayError> {
        if self.pixels.len() != self.width * self.height {
            return Err(DisplayError::FrameSize {
                width: self.width,
                height: self.height,
                len: self.pixels.len(),
            });
        }
        Ok(())
    }
}

pub trait Display {
    fn is_available(&self) -> bool;

    fn show(&mut self, frame: &Frame<'_>) -> Result<(), DisplayError>;
}

/// No display attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDisplay;

impl Display for NullDisplay {
    fn is_available(&self) -> bool {
        false
    }

    fn show(&mut self, _frame: &Frame<'_>) -> Result<(), DisplayError> {
        Err(DisplayError::NotAttached)
    }
}

/// Writes the most recent frame to a binary PGM (P5) file.
#[derive(Clone, Debug)]
pub struct PgmSnapshot {
    path: PathBuf,
    frames: u64,
}

impl PgmSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frames: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl Display for PgmSnapshot {
    fn is_available(&self) -> bool {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.is_dir(),
            _ => true,
        }
    }

    fn show(&mut self, frame: &Frame<'_>) -> Result<(), DisplayError> {
        frame.check()?;
        let mut w = BufWriter::new(File::create(&self.path)?);
        write!(w, "P5\n{} {}\n255\n", frame.width, frame.height)?;
        let bytes: Vec<u8> = frame
            .pixels
            .iter()
            .map(|p| (p.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        w.write_all(&bytes)?;
        w.flush()?;
        self.frames += 1;
        Ok(())
    }
}

/// Show `frame` if the display is usable.
///
/// Returns the recoverable condition to record when the display errors; an
/// absent display is only logged.
pub fn present(display: &mut dyn Display, frame: &Frame<'_>) -> Option<BenchError> {
    if !display.is_available() {
        info!("no display available, skipping visualization");
        return None;
    }
    match display.show(frame) {
        Ok(()) => None,
        Err(e) => {
            let notice = BenchError::VisualizationUnavailable(e);
            info!("{notice}");
            Some(notice)
        }
    }
}
