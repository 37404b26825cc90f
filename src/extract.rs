//! Frame extraction stage: walk the input roots, register every eligible
//! video file, and produce the missing thumbnails through a bounded pool of
//! worker threads shelling out to ffmpeg.
//!
//! Shape: one dispatch thread walks and feeds a bounded request queue, P
//! workers drain it, and failures flow back over a response queue that the
//! calling thread drains. The response senders are dropped as workers exit,
//! so draining to channel close guarantees every worker is done.

use crate::config::ProcessorConfig;
use crate::state::State;
use crate::stats::StatsCollector;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use thiserror::Error;
use walkdir::WalkDir;

/// Seek offsets tried in order. Extraction starts at ten seconds in; short
/// videos fall back to earlier offsets.
pub const EXTRACT_OFFSETS: [&str; 3] = ["00:10", "00:03", "00:01"];

const VIDEO_EXTENSIONS: [&str; 9] = [
    "mp4", "mov", "avi", "mkv", "wmv", "flv", "webm", "ogg", "ogv",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to run ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg failed ({0})")]
    ToolFailed(i32),

    #[error("extraction produced no thumbnail file")]
    MissingOutput,
}

/// Seam between the pipeline and the external frame-grabbing tool.
pub trait FrameExtractor: Send + Sync {
    /// Produce `thumbnail` from `video` at the given seek offset. Success
    /// requires both a clean exit and the output file existing afterwards.
    fn extract_at(&self, video: &Path, thumbnail: &Path, offset: &str)
    -> Result<(), ExtractError>;
}

/// Production extractor: one blocking ffmpeg subprocess per call.
pub struct FfmpegExtractor;

impl FrameExtractor for FfmpegExtractor {
    fn extract_at(
        &self,
        video: &Path,
        thumbnail: &Path,
        offset: &str,
    ) -> Result<(), ExtractError> {
        log::debug!(
            "generating frame at offset {offset}: {} -> {}",
            video.display(),
            thumbnail.display()
        );

        let status = Command::new("ffmpeg")
            .args(["-loglevel", "quiet", "-y", "-ss", offset, "-i"])
            .arg(video)
            .args(["-frames:v", "1", "-q:v", "2", "-s", "400x400"])
            .arg(thumbnail)
            .status()
            .map_err(ExtractError::Spawn)?;

        if !status.success() {
            return Err(ExtractError::ToolFailed(status.code().unwrap_or(-1)));
        }

        if !thumbnail.exists() {
            return Err(ExtractError::MissingOutput);
        }

        Ok(())
    }
}

struct ExtractJob {
    frame_id: u64,
    video: PathBuf,
    thumbnail: PathBuf,
}

struct ExtractFailure {
    frame_id: u64,
    video: PathBuf,
}

/// Run the extraction stage over `directories`. Returns the frame IDs that
/// have a usable thumbnail after this run, in dispatch order; files whose
/// extraction failed at every offset are left registered but excluded.
pub(crate) fn run_extraction(
    config: &ProcessorConfig,
    state: &State,
    extractor: &dyn FrameExtractor,
    stats: &StatsCollector,
    directories: &[PathBuf],
) -> Vec<u64> {
    let (job_tx, job_rx) = bounded::<ExtractJob>(config.workers);
    let (fail_tx, fail_rx) = bounded::<ExtractFailure>(config.workers);

    let mut frames = Vec::new();

    thread::scope(|scope| {
        for worker_id in 0..config.workers {
            let job_rx = job_rx.clone();
            let fail_tx = fail_tx.clone();
            scope.spawn(move || extraction_worker(worker_id, extractor, stats, job_rx, fail_tx));
        }
        drop(job_rx);
        drop(fail_tx);

        let dispatcher =
            scope.spawn(move || dispatch_jobs(config, state, stats, directories, job_tx));

        let mut failed = HashSet::new();
        for failure in fail_rx {
            log::debug!(
                "frame {} ('{}') failed extraction",
                failure.frame_id,
                failure.video.display()
            );
            failed.insert(failure.frame_id);
        }

        // A panicked dispatcher means an unknown frame set; treat it like a
        // run where nothing could be extracted rather than tearing down.
        let dispatched = match dispatcher.join() {
            Ok(frames) => frames,
            Err(_) => {
                log::error!("extraction dispatcher thread panicked, no frames this run");
                Vec::new()
            }
        };
        frames = dispatched
            .into_iter()
            .filter(|frame_id| !failed.contains(frame_id))
            .collect();
    });

    stats.finish_generation();
    log::debug!("done generating frames ({} usable)", frames.len());
    frames
}

/// Walk the roots in lexical order, register eligible files, and queue a job
/// for every frame whose thumbnail is missing.
fn dispatch_jobs(
    config: &ProcessorConfig,
    state: &State,
    stats: &StatsCollector,
    directories: &[PathBuf],
    job_tx: Sender<ExtractJob>,
) -> Vec<u64> {
    let mut frames = Vec::new();
    let mut seen = HashSet::new();

    for dir in directories {
        for entry in WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() || !is_eligible(config, entry.path()) {
                continue;
            }

            let path = if config.use_absolute_paths {
                normalize_path(entry.path())
            } else {
                entry.path().to_path_buf()
            };

            let (frame_id, found) = state.register_file(&path);

            if seen.insert(frame_id) {
                frames.push(frame_id);
            }

            let thumbnail = state.frame_file_name(frame_id);

            if !found || !thumbnail.exists() {
                log::debug!("file '{}' has no frame", path.display());
                stats.inc_frames_to_generate();

                let job = ExtractJob {
                    frame_id,
                    video: path,
                    thumbnail,
                };

                // Send only fails when every worker is gone; nothing left to do.
                if job_tx.send(job).is_err() {
                    log::error!("extraction workers exited early, stopping dispatch");
                    return frames;
                }
            } else {
                stats.frame_generated();
            }
        }
    }

    log::debug!("all frame generation jobs sent");
    frames
}

fn extraction_worker(
    worker_id: usize,
    extractor: &dyn FrameExtractor,
    stats: &StatsCollector,
    job_rx: Receiver<ExtractJob>,
    fail_tx: Sender<ExtractFailure>,
) {
    for job in job_rx {
        if let Err(err) = generate_frame(extractor, &job) {
            log::error!(
                "worker {worker_id}: failed to generate frame for '{}': {err}",
                job.video.display()
            );
            let failure = ExtractFailure {
                frame_id: job.frame_id,
                video: job.video,
            };
            if fail_tx.send(failure).is_err() {
                return;
            }
        }

        stats.frame_generated();
    }
}

/// Try each offset in order; the first success wins.
fn generate_frame(extractor: &dyn FrameExtractor, job: &ExtractJob) -> Result<(), ExtractError> {
    let mut last_error = None;

    for offset in EXTRACT_OFFSETS {
        match extractor.extract_at(&job.video, &job.thumbnail, offset) {
            Ok(()) => return Ok(()),
            Err(err) => {
                log::warn!(
                    "failed to generate frame for '{}' at offset {offset}",
                    job.video.display()
                );
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or(ExtractError::MissingOutput))
}

pub(crate) fn is_eligible(config: &ProcessorConfig, path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    if !VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
        return false;
    }

    match &config.exclude {
        Some(pattern) => !pattern.is_match(&path.to_string_lossy()),
        None => true,
    }
}

/// Count the files the pipeline will consider, for progress sizing.
pub(crate) fn count_video_files(config: &ProcessorConfig, directories: &[PathBuf]) -> usize {
    directories
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(Result::ok))
        .filter(|entry| entry.file_type().is_file() && is_eligible(config, entry.path()))
        .count()
}

/// Anchor a relative path to the current working directory. No symlink
/// resolution; the stored name should match what the operator typed.
fn normalize_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(err) => {
            log::error!("cannot resolve working directory: {err}");
            path.to_path_buf()
        }
    }
}
