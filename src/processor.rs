//! Orchestrator tying the stages together. Owns the state and the two
//! external collaborators (frame extractor, similarity oracle) and exposes
//! the three public operations: process, unmatch, compact.

use crate::buckets::BucketTable;
use crate::compare::run_comparisons;
use crate::config::{ConfigError, ProcessorConfig};
use crate::extract::{FfmpegExtractor, FrameExtractor, count_video_files, run_extraction};
use crate::oracle::{PerceptualOracle, SimilarityOracle};
use crate::report::{BucketReport, bucket_reports};
use crate::state::{CompactionSummary, State, StateError};
use crate::stats::StatsSnapshot;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("no directories passed")]
    NoDirectories,

    #[error("not a proper directory: '{}'", .0.display())]
    NotADirectory(PathBuf),

    #[error("unmatching requires at least two files")]
    NotEnoughFiles,

    #[error("failed to unmatch: {unknown} of the given files are unknown")]
    UnknownFiles { unknown: usize },
}

/// Outcome of one processing run: the reportable buckets plus the counters
/// accumulated along the way.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub buckets: Vec<BucketReport>,
    pub stats: StatsSnapshot,
}

pub struct Processor {
    config: ProcessorConfig,
    state: State,
    extractor: Box<dyn FrameExtractor>,
    oracle: Box<dyn SimilarityOracle>,
}

impl Processor {
    /// Build a processor with the production collaborators: ffmpeg for frame
    /// extraction and the perceptual oracle configured with the run's
    /// tolerances.
    pub fn new(config: ProcessorConfig) -> Result<Self, ProcessError> {
        let oracle = PerceptualOracle::new(config.chr_tolerance, config.prop_tolerance);
        Self::with_components(config, Box::new(FfmpegExtractor), Box::new(oracle))
    }

    /// Build a processor around custom collaborators.
    pub fn with_components(
        config: ProcessorConfig,
        extractor: Box<dyn FrameExtractor>,
        oracle: Box<dyn SimilarityOracle>,
    ) -> Result<Self, ProcessError> {
        config.validate()?;
        let state = State::open(config.state_directory.as_deref())?;

        Ok(Self {
            config,
            state,
            extractor,
            oracle,
        })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Scan the given directories and cluster visually similar videos.
    pub fn process(&self, directories: &[PathBuf]) -> Result<RunReport, ProcessError> {
        if directories.is_empty() {
            return Err(ProcessError::NoDirectories);
        }

        let mut bad_directory = None;

        for dir in directories {
            if !dir.is_dir() {
                log::error!("not a proper directory: '{}'", dir.display());
                bad_directory.get_or_insert_with(|| dir.clone());
            }
        }

        if let Some(dir) = bad_directory {
            return Err(ProcessError::NotADirectory(dir));
        }

        let stats = crate::stats::StatsCollector::new(self.config.quiet);
        stats.set_files_to_process(count_video_files(&self.config, directories));

        let frames = run_extraction(
            &self.config,
            &self.state,
            self.extractor.as_ref(),
            &stats,
            directories,
        );

        let buckets = BucketTable::new();
        run_comparisons(
            &self.config,
            &self.state,
            self.oracle.as_ref(),
            &stats,
            &buckets,
            &frames,
        );

        Ok(RunReport {
            buckets: bucket_reports(&self.state, &buckets),
            stats: stats.snapshot(),
        })
    }

    /// Mark every pairwise combination of the given, already-known files as
    /// a false positive so future runs stop reporting them as duplicates.
    pub fn unmatch(&self, files: &[PathBuf]) -> Result<(), ProcessError> {
        if files.len() < 2 {
            return Err(ProcessError::NotEnoughFiles);
        }

        let mut unknown = 0;

        for (i, file_a) in files.iter().enumerate() {
            let Some(frame_a) = self.state.frame_id(file_a) else {
                log::error!("file '{}' is unknown", file_a.display());
                unknown += 1;
                continue;
            };

            for file_b in &files[..i] {
                let Some(frame_b) = self.state.frame_id(file_b) else {
                    continue;
                };

                self.state.mark_false_positive(frame_a, frame_b)?;
            }
        }

        if unknown > 0 {
            return Err(ProcessError::UnknownFiles { unknown });
        }

        Ok(())
    }

    /// Prune stale state; see [`State::compact`]. Never called by `process`.
    pub fn compact_state(&self) -> Result<CompactionSummary, ProcessError> {
        Ok(self.state.compact()?)
    }
}
