//! Run counters and progress display. Counters are atomics so both worker
//! pools and both consumer tasks can report without coordination; the
//! progress bars are created lazily when the first event of a stage lands.

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct StatsCollector {
    quiet: bool,
    files_to_process: AtomicUsize,
    frames_to_generate: AtomicUsize,
    frames_generated: AtomicUsize,
    total_comparisons: AtomicUsize,
    comparisons_made: AtomicUsize,
    cache_hits: AtomicUsize,
    matches: AtomicUsize,
    false_positives: AtomicUsize,
    generate_bar: OnceLock<ProgressBar>,
    compare_bar: OnceLock<ProgressBar>,
}

impl StatsCollector {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            files_to_process: AtomicUsize::new(0),
            frames_to_generate: AtomicUsize::new(0),
            frames_generated: AtomicUsize::new(0),
            total_comparisons: AtomicUsize::new(0),
            comparisons_made: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            matches: AtomicUsize::new(0),
            false_positives: AtomicUsize::new(0),
            generate_bar: OnceLock::new(),
            compare_bar: OnceLock::new(),
        }
    }

    pub fn set_files_to_process(&self, count: usize) {
        self.files_to_process.store(count, Ordering::Relaxed);
    }

    pub fn inc_frames_to_generate(&self) {
        self.frames_to_generate.fetch_add(1, Ordering::Relaxed);
    }

    /// One file accounted for by the extraction stage, whether its thumbnail
    /// was freshly generated or already on disk.
    pub fn frame_generated(&self) {
        self.frames_generated.fetch_add(1, Ordering::Relaxed);

        if !self.quiet {
            let total = self.files_to_process.load(Ordering::Relaxed);
            self.generate_bar
                .get_or_init(|| styled_bar(total as u64, "Generating frames..."))
                .inc(1);
        }
    }

    pub fn set_total_comparisons(&self, count: usize) {
        self.total_comparisons.store(count, Ordering::Relaxed);
    }

    /// One pair accounted for, whether served from the cache or computed.
    pub fn comparison_made(&self) {
        self.comparisons_made.fetch_add(1, Ordering::Relaxed);

        if !self.quiet {
            let total = self.total_comparisons.load(Ordering::Relaxed);
            self.compare_bar
                .get_or_init(|| styled_bar(total as u64, "Comparing frames..."))
                .inc(1);
        }
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn match_found(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn false_positive(&self) {
        self.false_positives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish_generation(&self) {
        if let Some(bar) = self.generate_bar.get() {
            bar.finish_and_clear();
        }
    }

    pub fn finish_comparisons(&self) {
        if let Some(bar) = self.compare_bar.get() {
            bar.finish_and_clear();
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_to_process: self.files_to_process.load(Ordering::Relaxed),
            frames_to_generate: self.frames_to_generate.load(Ordering::Relaxed),
            frames_generated: self.frames_generated.load(Ordering::Relaxed),
            total_comparisons: self.total_comparisons.load(Ordering::Relaxed),
            comparisons_made: self.comparisons_made.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
            false_positives: self.false_positives.load(Ordering::Relaxed),
        }
    }
}

fn styled_bar(len: u64, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(len).with_message(message);

    if let Ok(style) = ProgressStyle::with_template("{msg} {wide_bar} {pos}/{len} ({eta})") {
        bar.set_style(style);
    }

    bar
}

/// Point-in-time copy of the run counters, used for the summary block and
/// returned alongside the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub files_to_process: usize,
    pub frames_to_generate: usize,
    pub frames_generated: usize,
    pub total_comparisons: usize,
    pub comparisons_made: usize,
    pub cache_hits: usize,
    pub matches: usize,
    pub false_positives: usize,
}

impl StatsSnapshot {
    /// Comparisons that actually ran this time rather than being served from
    /// the cache.
    pub fn new_comparisons(&self) -> usize {
        self.total_comparisons.saturating_sub(self.cache_hits)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generated_pct = percentage(self.frames_to_generate, self.files_to_process);
        let new_pct = percentage(self.new_comparisons(), self.total_comparisons);

        writeln!(f, "SUMMARY")?;
        writeln!(f, "=======")?;
        writeln!(f, "Video files:         {:10}", self.files_to_process)?;
        writeln!(
            f,
            "Frames generated:    {:10}  ({generated_pct}%)",
            self.frames_to_generate
        )?;
        writeln!(f, "Total comparisons:   {:10}", self.total_comparisons)?;
        writeln!(
            f,
            "New comparisons:     {:10}  ({new_pct}%)",
            self.new_comparisons()
        )?;
        writeln!(f, "Total matches:       {:10}", self.matches)?;
        write!(f, "False positives:     {:10}", self.false_positives)
    }
}

fn percentage(part: usize, whole: usize) -> usize {
    if whole == 0 { 0 } else { part * 100 / whole }
}
