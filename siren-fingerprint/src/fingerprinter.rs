//! Fingerprint extraction black box
//!
//! The extractor is an external executable: it receives the audio file path as
//! its only argument and prints a JSON array of `[hash, timestamp]` pairs.

use crate::config::CoreConfig;
use crate::types::{Fingerprint, Hash, Timestamp};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Fingerprint extractor is not configured")]
    NotConfigured,

    #[error("Failed to run extractor: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Extractor exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("Unreadable extractor output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Extractor produced an empty fingerprint")]
    Empty,
}

pub trait FingerprintCore: Send + Sync {
    fn make_fingerprint(&self, path: &Path) -> Result<Fingerprint, CoreError>;
}

/// Runs an external extractor program.
pub struct CommandCore {
    program: PathBuf,
    config: CoreConfig,
}

impl CommandCore {
    pub fn new(program: PathBuf, config: CoreConfig) -> Self {
        Self { program, config }
    }
}

/// Parse extractor output: `[[hash, timestamp], ...]`
pub fn parse_output(raw: &[u8]) -> Result<Fingerprint, CoreError> {
    let mut points: Vec<(Hash, Timestamp)> = serde_json::from_slice(raw)?;
    if points.is_empty() {
        return Err(CoreError::Empty);
    }
    points.sort_by_key(|&(hash, timestamp)| (timestamp, hash));
    points.dedup();
    Ok(Fingerprint::new(points))
}

impl FingerprintCore for CommandCore {
    fn make_fingerprint(&self, path: &Path) -> Result<Fingerprint, CoreError> {
        let mut command = Command::new(&self.program);
        command.arg(path);
        if let Some(zscore) = self.config.peak_zscore {
            command.env("CORE_PEAK_ZSCORE", zscore.to_string());
        }
        if let Some(block_size) = self.config.block_size {
            command.env("CORE_BLOCK_SIZE", block_size.to_string());
        }
        if let Some(stride) = self.config.block_stride_coeff {
            command.env("CORE_BLOCK_STRIDE_COEFF", stride.to_string());
        }

        debug!(program = %self.program.display(), file = %path.display(), "Running fingerprint extractor");
        let output = command.output()?;
        if !output.status.success() {
            return Err(CoreError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let fingerprint = parse_output(&output.stdout)?;
        info!(file = %path.display(), size = fingerprint.len(), "Extracted fingerprint");
        Ok(fingerprint)
    }
}

/// Placeholder used when no extractor is configured: every request fails.
pub struct UnconfiguredCore;

impl FingerprintCore for UnconfiguredCore {
    fn make_fingerprint(&self, _path: &Path) -> Result<Fingerprint, CoreError> {
        Err(CoreError::NotConfigured)
    }
}

/// Pick the extractor described by `config`.
pub fn from_config(config: &CoreConfig) -> Box<dyn FingerprintCore> {
    match &config.command {
        Some(program) => Box::new(CommandCore::new(program.clone(), config.clone())),
        None => Box::new(UnconfiguredCore),
    }
}
