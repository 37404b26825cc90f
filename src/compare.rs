//! Comparison stage: enumerate every unordered pair of usable frames,
//! serve what the score cache already knows, and dispatch only the misses
//! to a bounded pool of oracle workers. Each freshly computed score is
//! persisted before its match signal is consumed, so a pair is compared at
//! most once across all runs.

use crate::buckets::BucketTable;
use crate::config::ProcessorConfig;
use crate::oracle::{OracleError, SimilarityOracle};
use crate::state::State;
use crate::stats::StatsCollector;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::path::Path;
use std::thread;

/// Sentinel scores the oracle verdict maps onto. These are not a continuous
/// metric; the storage format merely happens to allow one.
pub const SCORE_SIMILAR: f32 = 0.001;
pub const SCORE_DIFFERENT: f32 = 1.0;

/// Scores at or below this value count as a match.
pub const SIMILARITY_THRESHOLD: f32 = 0.5;

struct CompareJob {
    frame_a: u64,
    frame_b: u64,
}

struct CompareOutcome {
    frame_a: u64,
    frame_b: u64,
    score: Result<f32, OracleError>,
}

/// Run the comparison stage over the final frame set, feeding match signals
/// into `buckets`.
pub(crate) fn run_comparisons(
    config: &ProcessorConfig,
    state: &State,
    oracle: &dyn SimilarityOracle,
    stats: &StatsCollector,
    buckets: &BucketTable,
    frames: &[u64],
) {
    stats.set_total_comparisons(frames.len() * frames.len().saturating_sub(1) / 2);

    let (job_tx, job_rx) = bounded::<CompareJob>(config.workers);
    let (result_tx, result_rx) = bounded::<CompareOutcome>(config.workers);

    thread::scope(|scope| {
        for worker_id in 0..config.workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || comparison_worker(worker_id, state, oracle, job_rx, result_tx));
        }
        drop(job_rx);
        // The workers hold the only remaining result senders, so the drain
        // below ends exactly when the last worker has exited.
        drop(result_tx);

        scope.spawn(move || dispatch_pairs(config, state, stats, buckets, frames, job_tx));

        for outcome in result_rx {
            if let Ok(score) = outcome.score {
                state.set_comparison_score(outcome.frame_a, outcome.frame_b, score);
                consume_score(config, stats, buckets, outcome.frame_a, outcome.frame_b, score);
            }

            stats.comparison_made();
        }
    });

    stats.finish_comparisons();
    log::debug!("done comparing frames");
}

/// Enumerate pairs in nested ascending-index order. Cache hits are consumed
/// inline and never reach the workers.
fn dispatch_pairs(
    config: &ProcessorConfig,
    state: &State,
    stats: &StatsCollector,
    buckets: &BucketTable,
    frames: &[u64],
    job_tx: Sender<CompareJob>,
) {
    for (i, &frame_a) in frames.iter().enumerate() {
        for &frame_b in &frames[..i] {
            if let Some(score) = state.comparison_score(frame_a, frame_b) {
                consume_score(config, stats, buckets, frame_a, frame_b, score);
                stats.cache_hit();
                stats.comparison_made();
                continue;
            }

            if job_tx.send(CompareJob { frame_a, frame_b }).is_err() {
                log::error!("comparison workers exited early, stopping dispatch");
                return;
            }
        }
    }

    log::debug!("all comparison jobs sent");
}

fn comparison_worker(
    worker_id: usize,
    state: &State,
    oracle: &dyn SimilarityOracle,
    job_rx: Receiver<CompareJob>,
    result_tx: Sender<CompareOutcome>,
) {
    for job in job_rx {
        let left = state.frame_file_name(job.frame_a);
        let right = state.frame_file_name(job.frame_b);

        let score = compare_thumbnails(oracle, &left, &right);

        if let Err(error) = &score {
            log::error!(
                "worker {worker_id}: comparison error: {} <> {}: {error}",
                job.frame_a,
                job.frame_b
            );
        }

        let outcome = CompareOutcome {
            frame_a: job.frame_a,
            frame_b: job.frame_b,
            score,
        };

        if result_tx.send(outcome).is_err() {
            return;
        }
    }
}

fn compare_thumbnails(
    oracle: &dyn SimilarityOracle,
    left: &Path,
    right: &Path,
) -> Result<f32, OracleError> {
    if oracle.similar(left, right)? {
        log::debug!("SIMILAR: {} and {}", left.display(), right.display());
        Ok(SCORE_SIMILAR)
    } else {
        Ok(SCORE_DIFFERENT)
    }
}

/// Turn one retrieved or computed score into a bucket assignment or a
/// counter bump. A negative score is an operator-flagged false positive and
/// never merges buckets unless the run is configured to ignore the flag.
fn consume_score(
    config: &ProcessorConfig,
    stats: &StatsCollector,
    buckets: &BucketTable,
    frame_a: u64,
    frame_b: u64,
    score: f32,
) {
    let false_positive = score < 0.0 && !config.ignore_false_positives;

    if false_positive {
        stats.false_positive();
    } else if score <= SIMILARITY_THRESHOLD {
        buckets.record_match(frame_a, frame_b);
        stats.match_found();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (ProcessorConfig, StatsCollector, BucketTable) {
        (
            ProcessorConfig {
                quiet: true,
                ..ProcessorConfig::default()
            },
            StatsCollector::new(true),
            BucketTable::new(),
        )
    }

    #[test]
    fn similar_score_buckets_the_pair() {
        let (config, stats, buckets) = fixtures();
        consume_score(&config, &stats, &buckets, 1, 2, SCORE_SIMILAR);

        assert_eq!(buckets.groups()[&1], vec![1, 2]);
        assert_eq!(stats.snapshot().matches, 1);
    }

    #[test]
    fn different_score_is_not_a_match() {
        let (config, stats, buckets) = fixtures();
        consume_score(&config, &stats, &buckets, 1, 2, SCORE_DIFFERENT);

        assert!(buckets.groups().is_empty());
        assert_eq!(stats.snapshot().matches, 0);
        assert_eq!(stats.snapshot().false_positives, 0);
    }

    #[test]
    fn negative_score_counts_as_false_positive() {
        let (config, stats, buckets) = fixtures();
        consume_score(&config, &stats, &buckets, 1, 2, -SCORE_SIMILAR);

        assert!(buckets.groups().is_empty());
        assert_eq!(stats.snapshot().false_positives, 1);
    }

    #[test]
    fn false_positive_flag_can_be_ignored() {
        let (mut config, stats, buckets) = fixtures();
        config.ignore_false_positives = true;
        consume_score(&config, &stats, &buckets, 1, 2, -SCORE_SIMILAR);

        assert_eq!(buckets.groups()[&1], vec![1, 2]);
        assert_eq!(stats.snapshot().false_positives, 0);
    }

    #[test]
    fn threshold_is_inclusive() {
        let (config, stats, buckets) = fixtures();
        consume_score(&config, &stats, &buckets, 1, 2, SIMILARITY_THRESHOLD);

        assert_eq!(buckets.groups()[&1], vec![1, 2]);
        let _ = stats.snapshot();
    }
}
