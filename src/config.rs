use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_CHR_TOLERANCE: f64 = 0.3;
pub const DEFAULT_PROP_TOLERANCE: f64 = 10.0;
pub const MAX_WORKERS: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bad number of workers: {0} (expected 1..={MAX_WORKERS})")]
    BadWorkerCount(usize),
}

/// Immutable settings shared by every pipeline component. Built once by the
/// caller and passed by reference; nothing here changes during a run.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Worker threads per pipeline stage.
    pub workers: usize,
    /// Directory holding the database and thumbnails. `None` means an
    /// ephemeral temporary directory (nothing survives the run).
    pub state_directory: Option<PathBuf>,
    /// Luma/chrominance tolerance for the similarity oracle. Values below 1
    /// tighten the comparison, values above 1 loosen it.
    pub chr_tolerance: f64,
    /// Proportion (aspect-ratio) tolerance for the similarity oracle.
    pub prop_tolerance: f64,
    /// Files whose path matches this pattern are skipped.
    pub exclude: Option<Regex>,
    /// Suppress progress output.
    pub quiet: bool,
    /// Store filenames as absolute paths.
    pub use_absolute_paths: bool,
    /// Treat operator-flagged false positives as ordinary matches.
    pub ignore_false_positives: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            state_directory: None,
            chr_tolerance: DEFAULT_CHR_TOLERANCE,
            prop_tolerance: DEFAULT_PROP_TOLERANCE,
            exclude: None,
            quiet: false,
            use_absolute_paths: false,
            ignore_false_positives: false,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers < 1 || self.workers > MAX_WORKERS {
            return Err(ConfigError::BadWorkerCount(self.workers));
        }

        Ok(())
    }
}

/// Host parallelism, clamped to the supported worker range.
pub fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}
