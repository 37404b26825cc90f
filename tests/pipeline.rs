//! End-to-end pipeline tests driven through scripted collaborators: a stub
//! extractor that writes placeholder thumbnails instead of running ffmpeg,
//! and an oracle that answers from a fixed verdict table.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use vidmatch::extract::{ExtractError, FrameExtractor};
use vidmatch::oracle::{OracleError, SimilarityOracle};
use vidmatch::{Processor, ProcessorConfig};

/// Writes a stub thumbnail unless the offset is scripted to fail; records
/// every attempted (video, offset) pair.
struct StubExtractor {
    failing_offsets: Vec<&'static str>,
    attempts: Mutex<Vec<(PathBuf, String)>>,
}

impl StubExtractor {
    fn new(failing_offsets: Vec<&'static str>) -> Self {
        Self {
            failing_offsets,
            attempts: Mutex::new(Vec::new()),
        }
    }

    fn attempts(&self) -> Vec<(PathBuf, String)> {
        self.attempts.lock().unwrap().clone()
    }
}

impl FrameExtractor for StubExtractor {
    fn extract_at(
        &self,
        video: &Path,
        thumbnail: &Path,
        offset: &str,
    ) -> Result<(), ExtractError> {
        self.attempts
            .lock()
            .unwrap()
            .push((video.to_path_buf(), offset.to_string()));

        if self.failing_offsets.contains(&offset) {
            return Err(ExtractError::ToolFailed(1));
        }

        fs::write(thumbnail, b"thumb").map_err(ExtractError::Spawn)
    }
}

/// Answers similarity queries from a verdict table keyed by the frame
/// numbers parsed out of the thumbnail filenames. Unlisted pairs are
/// different. Counts every invocation.
struct ScriptedOracle {
    verdicts: HashMap<(u64, u64), bool>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    fn new(similar_pairs: &[(u64, u64)]) -> Self {
        let verdicts = similar_pairs
            .iter()
            .map(|&(a, b)| ((a.min(b), a.max(b)), true))
            .collect();

        Self {
            verdicts,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

fn frame_number(thumbnail: &Path) -> u64 {
    thumbnail
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.strip_prefix("frame"))
        .and_then(|digits| digits.parse().ok())
        .expect("thumbnail path should follow the frameNNNNNN.jpg convention")
}

impl SimilarityOracle for ScriptedOracle {
    fn similar(&self, left: &Path, right: &Path) -> Result<bool, OracleError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let (a, b) = (frame_number(left), frame_number(right));
        Ok(*self.verdicts.get(&(a.min(b), a.max(b))).unwrap_or(&false))
    }
}

fn quiet_config(state_dir: &TempDir) -> ProcessorConfig {
    ProcessorConfig {
        workers: 1,
        quiet: true,
        state_directory: Some(state_dir.path().to_path_buf()),
        ..ProcessorConfig::default()
    }
}

/// Creates `names` as video files under a fresh directory. Walk order is
/// lexical, so frame IDs are assigned in the given (sorted) order.
fn video_dir(names: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();

    for name in names {
        fs::write(dir.path().join(name), b"video bytes").unwrap();
    }

    dir
}

#[test]
fn transitive_matches_land_in_one_bucket() {
    let state_dir = TempDir::new().unwrap();
    let videos = video_dir(&["x.mp4", "y.mp4", "z.mp4"]);

    // x=1, y=2, z=3: x~y and y~z but x!~z. The greedy assigner still ends
    // up with a single bucket because y bridges before z is seen alone.
    let oracle = ScriptedOracle::new(&[(1, 2), (2, 3)]);
    let processor = Processor::with_components(
        quiet_config(&state_dir),
        Box::new(StubExtractor::new(vec![])),
        Box::new(oracle),
    )
    .unwrap();

    let report = processor.process(&[videos.path().to_path_buf()]).unwrap();

    assert_eq!(report.buckets.len(), 1);
    assert_eq!(report.buckets[0].files.len(), 3);
    assert_eq!(report.stats.total_comparisons, 3);
    assert_eq!(report.stats.matches, 2);
}

#[test]
fn second_run_is_served_entirely_from_the_cache() {
    let state_dir = TempDir::new().unwrap();
    let videos = video_dir(&["a.mp4", "b.mp4", "c.mp4", "d.mp4"]);

    let run = |oracle: Box<ScriptedOracle>| {
        let processor = Processor::with_components(
            quiet_config(&state_dir),
            Box::new(StubExtractor::new(vec![])),
            oracle,
        )
        .unwrap();
        processor.process(&[videos.path().to_path_buf()]).unwrap()
    };

    let first = run(Box::new(ScriptedOracle::new(&[(1, 2)])));
    assert_eq!(first.stats.total_comparisons, 6);
    assert_eq!(first.stats.cache_hits, 0);
    assert_eq!(first.buckets.len(), 1);

    // The second oracle claims nothing is similar; if it were ever asked,
    // the report would change. It must not be asked.
    let second_oracle = Box::new(ScriptedOracle::new(&[]));
    let second = run(second_oracle);

    assert_eq!(second.stats.cache_hits, 6);
    assert_eq!(second.stats.new_comparisons(), 0);
    assert_eq!(second.buckets, first.buckets);
}

#[test]
fn short_video_falls_back_to_earlier_offsets() {
    let state_dir = TempDir::new().unwrap();
    let videos = video_dir(&["short.mp4"]);

    let extractor = StubExtractor::new(vec!["00:10"]);
    let attempts_handle = std::sync::Arc::new(extractor);

    struct Shared(std::sync::Arc<StubExtractor>);
    impl FrameExtractor for Shared {
        fn extract_at(&self, v: &Path, t: &Path, o: &str) -> Result<(), ExtractError> {
            self.0.extract_at(v, t, o)
        }
    }

    let processor = Processor::with_components(
        quiet_config(&state_dir),
        Box::new(Shared(attempts_handle.clone())),
        Box::new(ScriptedOracle::new(&[])),
    )
    .unwrap();

    let report = processor.process(&[videos.path().to_path_buf()]).unwrap();
    assert_eq!(report.stats.frames_to_generate, 1);

    let offsets: Vec<String> = attempts_handle
        .attempts()
        .into_iter()
        .map(|(_, offset)| offset)
        .collect();
    assert_eq!(offsets, vec!["00:10", "00:03"]);

    // The thumbnail from the successful offset exists.
    assert!(processor.state().frame_file_name(1).exists());
}

#[test]
fn files_that_fail_every_offset_are_skipped_this_run() {
    let state_dir = TempDir::new().unwrap();
    let videos = video_dir(&["a.mp4", "b.mp4", "c.mp4"]);

    // Everything fails: no frames, no comparisons, empty report.
    let processor = Processor::with_components(
        quiet_config(&state_dir),
        Box::new(StubExtractor::new(vec!["00:10", "00:03", "00:01"])),
        Box::new(ScriptedOracle::new(&[(1, 2)])),
    )
    .unwrap();

    let report = processor.process(&[videos.path().to_path_buf()]).unwrap();
    assert!(report.buckets.is_empty());
    assert_eq!(report.stats.total_comparisons, 0);

    // The files stay registered so a future run can retry them.
    assert!(processor.state().frame_id(&videos.path().join("a.mp4")).is_some());
}

#[test]
fn unmatched_pair_is_excluded_from_future_buckets() {
    let state_dir = TempDir::new().unwrap();
    let videos = video_dir(&["a.mp4", "b.mp4"]);
    let roots = [videos.path().to_path_buf()];

    let build = |oracle: Box<ScriptedOracle>| {
        Processor::with_components(
            quiet_config(&state_dir),
            Box::new(StubExtractor::new(vec![])),
            oracle,
        )
        .unwrap()
    };

    let processor = build(Box::new(ScriptedOracle::new(&[(1, 2)])));
    let first = processor.process(&roots).unwrap();
    assert_eq!(first.buckets.len(), 1);

    processor
        .unmatch(&[videos.path().join("a.mp4"), videos.path().join("b.mp4")])
        .unwrap();

    let second = processor.process(&roots).unwrap();
    assert!(second.buckets.is_empty());
    assert_eq!(second.stats.false_positives, 1);
    assert_eq!(second.stats.cache_hits, 1);
}

#[test]
fn exclusion_pattern_keeps_files_out_of_the_pipeline() {
    let state_dir = TempDir::new().unwrap();
    let videos = video_dir(&["keep.mp4", "skip_me.mp4"]);

    let mut config = quiet_config(&state_dir);
    config.exclude = Some(regex::Regex::new("skip").unwrap());

    let processor = Processor::with_components(
        config,
        Box::new(StubExtractor::new(vec![])),
        Box::new(ScriptedOracle::new(&[])),
    )
    .unwrap();

    let report = processor.process(&[videos.path().to_path_buf()]).unwrap();
    assert_eq!(report.stats.files_to_process, 1);
    assert_eq!(report.stats.total_comparisons, 0);
    assert!(processor.state().frame_id(&videos.path().join("skip_me.mp4")).is_none());
}

#[test]
fn wider_worker_pool_drains_both_queues_and_reuses_the_cache() {
    let state_dir = TempDir::new().unwrap();
    let videos = video_dir(&[
        "a.mp4", "b.mp4", "c.mp4", "d.mp4", "e.mp4", "f.mp4", "g.mp4", "h.mp4",
    ]);

    let mut config = quiet_config(&state_dir);
    config.workers = 4;

    let run = |oracle: Box<ScriptedOracle>| {
        let processor = Processor::with_components(
            config.clone(),
            Box::new(StubExtractor::new(vec![])),
            oracle,
        )
        .unwrap();
        processor.process(&[videos.path().to_path_buf()]).unwrap()
    };

    // 8 files, 28 pairs, one similar pair computed across four workers.
    let first = run(Box::new(ScriptedOracle::new(&[(1, 2)])));
    assert_eq!(first.stats.total_comparisons, 28);
    assert_eq!(first.stats.comparisons_made, 28);
    assert_eq!(first.stats.cache_hits, 0);
    assert_eq!(first.buckets.len(), 1);
    assert_eq!(first.buckets[0].files.len(), 2);

    // Every pair was persisted before its worker exited, so the rerun is
    // answered entirely by the cache even with the pool still at four.
    let second = run(Box::new(ScriptedOracle::new(&[])));
    assert_eq!(second.stats.cache_hits, 28);
    assert_eq!(second.stats.new_comparisons(), 0);
    assert_eq!(second.buckets, first.buckets);
}

#[test]
fn oracle_failures_do_not_poison_the_cache() {
    let state_dir = TempDir::new().unwrap();
    let videos = video_dir(&["a.mp4", "b.mp4"]);
    let roots = [videos.path().to_path_buf()];

    struct FailingOracle;
    impl SimilarityOracle for FailingOracle {
        fn similar(&self, left: &Path, _right: &Path) -> Result<bool, OracleError> {
            Err(OracleError::Image {
                path: left.to_path_buf(),
                source: image::ImageError::IoError(std::io::Error::other("unreadable")),
            })
        }
    }

    let processor = Processor::with_components(
        quiet_config(&state_dir),
        Box::new(StubExtractor::new(vec![])),
        Box::new(FailingOracle),
    )
    .unwrap();

    let report = processor.process(&roots).unwrap();
    assert!(report.buckets.is_empty());
    assert_eq!(report.stats.comparisons_made, 1);

    // Release the state lock before reopening the same directory.
    drop(processor);

    // Nothing was cached, so the pair is retried next run.
    let retry = Processor::with_components(
        quiet_config(&state_dir),
        Box::new(StubExtractor::new(vec![])),
        Box::new(ScriptedOracle::new(&[(1, 2)])),
    )
    .unwrap();

    let second = retry.process(&roots).unwrap();
    assert_eq!(second.stats.cache_hits, 0);
    assert_eq!(second.buckets.len(), 1);
}
