//! Maintenance pass that prunes records referring to files no longer on
//! disk, plus the orphaned thumbnails they produced. Never runs as part of
//! the main pipeline.

use super::{State, StateError, encoding};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;

/// Below this fraction of still-existing files the compactor refuses to
/// delete anything. Paths are stored relative by default, so running from
/// the wrong directory would otherwise look like a fully vanished corpus
/// and wipe the store.
const MIN_VIABLE_FRACTION: f32 = 0.4;

const DELETE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionSummary {
    pub frame_records: usize,
    pub frame_records_deleted: usize,
    pub score_records: usize,
    pub score_records_deleted: usize,
    pub thumbnails: usize,
    pub thumbnails_deleted: usize,
    pub existing_files: usize,
    /// True when the safety gate stopped the pass before any deletion.
    pub aborted: bool,
}

impl fmt::Display for CompactionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.aborted {
            return write!(
                f,
                "Of {} entries in the store, only {} files are present -- compaction aborted",
                self.frame_records, self.existing_files
            );
        }

        writeln!(f, "Summary:")?;
        writeln!(
            f,
            "* Deleted {} ({}%) out of {} frame mapping records.",
            self.frame_records_deleted,
            percentage(self.frame_records_deleted, self.frame_records),
            self.frame_records
        )?;
        writeln!(
            f,
            "* Deleted {} ({}%) out of {} comparison score records.",
            self.score_records_deleted,
            percentage(self.score_records_deleted, self.score_records),
            self.score_records
        )?;
        write!(
            f,
            "* Deleted {} ({}%) out of {} thumbnail files.",
            self.thumbnails_deleted,
            percentage(self.thumbnails_deleted, self.thumbnails),
            self.thumbnails
        )
    }
}

fn percentage(part: usize, whole: usize) -> usize {
    if whole == 0 {
        0
    } else {
        part * 100 / whole
    }
}

impl State {
    /// Remove frame records for files missing on disk, score records that
    /// reference a removed frame, and thumbnails no surviving frame owns.
    /// Aborts without deleting when fewer than 40% of referenced files still
    /// exist; the abort is reported in the summary, not as an error.
    pub fn compact(&self) -> Result<CompactionSummary, StateError> {
        let db = self.db.as_ref().ok_or(StateError::NotPersistent)?;
        let mut summary = CompactionSummary::default();

        // Pass 1: count records and still-existing files for the safety gate.
        for item in db.scan_prefix(encoding::FRAME_PREFIX) {
            let (key, _) = item?;
            summary.frame_records += 1;

            if encoding::frame_key_path(&key).exists() {
                summary.existing_files += 1;
            }
        }

        if summary.frame_records == 0 {
            log::debug!("no entries to compact");
            return Ok(summary);
        }

        let existing_fraction = summary.existing_files as f32 / summary.frame_records as f32;

        if existing_fraction < MIN_VIABLE_FRACTION {
            log::error!(
                "of {} entries in the store, only {} files are present -- aborting compaction",
                summary.frame_records,
                summary.existing_files
            );
            summary.aborted = true;
            return Ok(summary);
        }

        // Pass 2: drop frame records for missing files, keeping the surviving
        // frame IDs and thumbnail paths for the later passes.
        let mut valid_frames: HashSet<u64> = HashSet::new();
        let mut valid_thumbnails: HashSet<PathBuf> = HashSet::new();

        for item in db.scan_prefix(encoding::FRAME_PREFIX) {
            let (key, value) = item?;
            let path = encoding::frame_key_path(&key);

            if !path.exists() {
                log::debug!("deleting frame record for '{}'", path.display());

                if let Err(err) = db.remove(&key) {
                    log::error!(
                        "failed to delete frame record for '{}': {err}",
                        path.display()
                    );
                    continue;
                }

                summary.frame_records_deleted += 1;
            } else {
                match encoding::decode_frame_value(&value) {
                    Some(frame_id) => {
                        valid_frames.insert(frame_id);
                        valid_thumbnails.insert(self.frame_file_name(frame_id));
                    }
                    None => log::error!("corrupt frame record for '{}'", path.display()),
                }
            }
        }

        // Pass 3: drop score records referencing a deleted frame, in batches.
        let mut batch = sled::Batch::default();
        let mut batch_len = 0;

        for item in db.scan_prefix(encoding::SCORE_PREFIX) {
            let (key, _) = item?;
            summary.score_records += 1;

            let Some((frame_a, frame_b)) = encoding::decode_score_key(&key) else {
                log::error!("skipping corrupt score key during compaction");
                continue;
            };

            if !valid_frames.contains(&frame_a) || !valid_frames.contains(&frame_b) {
                log::debug!("deleting score record for frame IDs {frame_a}, {frame_b}");
                batch.remove(key);
                summary.score_records_deleted += 1;
                batch_len += 1;

                if batch_len >= DELETE_BATCH_SIZE {
                    db.apply_batch(std::mem::take(&mut batch))?;
                    batch_len = 0;
                }
            }
        }

        if batch_len > 0 {
            db.apply_batch(batch)?;
        }

        // Best-effort space reclamation; nothing to reclaim is not an error.
        if let Err(err) = db.flush() {
            log::error!("store flush after compaction failed: {err}");
        }

        // Pass 4: delete thumbnails no surviving frame owns.
        match fs::read_dir(&self.data_dir) {
            Ok(entries) => {
                for entry in entries.filter_map(Result::ok) {
                    let path = entry.path();

                    if path.extension().is_none_or(|ext| ext != "jpg") {
                        continue;
                    }

                    summary.thumbnails += 1;

                    if !valid_thumbnails.contains(&path) {
                        log::debug!("deleting stale thumbnail '{}'", path.display());

                        if let Err(err) = fs::remove_file(&path) {
                            log::error!(
                                "failed to delete thumbnail '{}': {err}",
                                path.display()
                            );
                            continue;
                        }

                        summary.thumbnails_deleted += 1;
                    }
                }
            }
            Err(err) => log::error!("failed to list thumbnail directory: {err}"),
        }

        Ok(summary)
    }
}
