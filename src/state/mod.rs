//! Durable state: the frame store (path ↔ frame ID) and the score cache
//! (unordered frame pair → similarity score). Persistent mode keeps both in
//! an embedded sled database under `<state dir>/db`; ephemeral mode keeps
//! plain maps behind a mutex and roots thumbnails in a temporary directory.

mod compact;
mod encoding;

pub use compact::CompactionSummary;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("refusing to keep state in the current directory")]
    CurrentDirState,

    #[error("failed to create a temporary state directory")]
    TempDir(#[source] std::io::Error),

    #[error("state store error: {0}")]
    Store(#[from] sled::Error),

    #[error("operation requires a persistent state directory")]
    NotPersistent,
}

/// Persisted per-pair record. The false-positive flag is kept separate from
/// the magnitude internally; the two are only multiplexed into a signed float
/// at the public accessor, which preserves the on-disk convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoreEntry {
    score: f32,
    false_positive: bool,
}

#[derive(Default)]
struct MemTables {
    path_to_frame: HashMap<PathBuf, u64>,
    scores: HashMap<(u64, u64), ScoreEntry>,
}

pub struct State {
    data_dir: PathBuf,
    db: Option<sled::Db>,
    mem: Mutex<MemTables>,
    /// Frame ID → source video path. Rebuilt in memory as lookups happen;
    /// never persisted on its own.
    frame_paths: Mutex<HashMap<u64, PathBuf>>,
    next_frame_id: Mutex<u64>,
    _ephemeral: Option<TempDir>,
}

impl State {
    /// Open the state rooted at `state_dir`, or an ephemeral in-memory state
    /// when no directory is given. In persistent mode frame-ID assignment
    /// resumes above the highest ID already on disk, so IDs are never reused
    /// within a store.
    pub fn open(state_dir: Option<&Path>) -> Result<Self, StateError> {
        let (data_dir, ephemeral) = match state_dir {
            Some(dir) => (dir.to_path_buf(), None),
            None => {
                let tmp = TempDir::new().map_err(StateError::TempDir)?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        if data_dir == Path::new(".") {
            return Err(StateError::CurrentDirState);
        }

        let db = match state_dir {
            Some(dir) => Some(sled::open(dir.join("db"))?),
            None => None,
        };

        let state = Self {
            data_dir,
            db,
            mem: Mutex::new(MemTables::default()),
            frame_paths: Mutex::new(HashMap::new()),
            next_frame_id: Mutex::new(1),
            _ephemeral: ephemeral,
        };

        if state.db.is_some() {
            let max_id = state.max_frame_id()?;
            *state.next_frame_id.lock().unwrap() = max_id + 1;
            log::debug!("next frame ID: {}", max_id + 1);
        }

        Ok(state)
    }

    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Canonical thumbnail location for a frame.
    pub fn frame_file_name(&self, frame_id: u64) -> PathBuf {
        self.data_dir.join(format!("frame{frame_id:06}.jpg"))
    }

    /// Register a video file, assigning a fresh frame ID on first sight.
    /// Returns the ID and whether the path was already known.
    pub fn register_file(&self, path: &Path) -> (u64, bool) {
        let (frame_id, found) = match &self.db {
            Some(db) => self.register_persistent(db, path),
            None => {
                let mut mem = self.mem.lock().unwrap();
                match mem.path_to_frame.get(path) {
                    Some(&frame_id) => (frame_id, true),
                    None => {
                        let frame_id = self.take_next_frame_id();
                        mem.path_to_frame.insert(path.to_path_buf(), frame_id);
                        (frame_id, false)
                    }
                }
            }
        };

        self.frame_paths
            .lock()
            .unwrap()
            .insert(frame_id, path.to_path_buf());
        (frame_id, found)
    }

    /// Look up the frame ID of an already-registered file.
    pub fn frame_id(&self, path: &Path) -> Option<u64> {
        let frame_id = match &self.db {
            Some(db) => {
                let key = encoding::frame_key(&path.to_string_lossy());
                match db.get(key) {
                    Ok(Some(value)) => encoding::decode_frame_value(&value),
                    Ok(None) => None,
                    Err(err) => {
                        log::error!("frame lookup for '{}' failed: {err}", path.display());
                        None
                    }
                }
            }
            None => self.mem.lock().unwrap().path_to_frame.get(path).copied(),
        }?;

        self.frame_paths
            .lock()
            .unwrap()
            .insert(frame_id, path.to_path_buf());
        Some(frame_id)
    }

    /// Source video path for a frame, if it was seen during this run.
    pub fn video_path(&self, frame_id: u64) -> Option<PathBuf> {
        self.frame_paths.lock().unwrap().get(&frame_id).cloned()
    }

    /// Cached similarity score for an unordered pair. A pair flagged as a
    /// false positive is surfaced as the negated magnitude so callers can
    /// tell "different" from "falsely matched".
    pub fn comparison_score(&self, frame_a: u64, frame_b: u64) -> Option<f32> {
        let entry = match &self.db {
            Some(db) => {
                let key = encoding::score_key(frame_a, frame_b);
                match db.get(key) {
                    Ok(Some(value)) => {
                        let decoded = encoding::decode_score_value(&value);
                        if decoded.is_none() {
                            log::error!("corrupt score record for pair ({frame_a}, {frame_b})");
                        }
                        decoded.map(|(score, false_positive)| ScoreEntry {
                            score,
                            false_positive,
                        })
                    }
                    Ok(None) => None,
                    Err(err) => {
                        log::error!("score lookup for ({frame_a}, {frame_b}) failed: {err}");
                        None
                    }
                }
            }
            None => {
                let key = ordered_pair(frame_a, frame_b);
                self.mem.lock().unwrap().scores.get(&key).copied()
            }
        }?;

        if entry.false_positive {
            Some(-entry.score)
        } else {
            Some(entry.score)
        }
    }

    /// Record a freshly computed score. Clears any false-positive flag.
    pub fn set_comparison_score(&self, frame_a: u64, frame_b: u64, score: f32) {
        match &self.db {
            Some(db) => {
                let key = encoding::score_key(frame_a, frame_b);
                let value = encoding::score_value(score, false);
                if let Err(err) = db.insert(&key, &value[..]) {
                    log::error!("failed to store score for ({frame_a}, {frame_b}): {err}");
                }
            }
            None => {
                let key = ordered_pair(frame_a, frame_b);
                self.mem.lock().unwrap().scores.insert(
                    key,
                    ScoreEntry {
                        score,
                        false_positive: false,
                    },
                );
            }
        }
    }

    /// Flag an existing score record as an operator-confirmed false positive.
    /// The stored magnitude is left untouched.
    pub fn mark_false_positive(&self, frame_a: u64, frame_b: u64) -> Result<(), StateError> {
        let db = self.db.as_ref().ok_or(StateError::NotPersistent)?;
        let key = encoding::score_key(frame_a, frame_b);

        match db.get(&key)? {
            Some(value) => match encoding::decode_score_value(&value) {
                Some((score, _)) => {
                    db.insert(&key, &encoding::score_value(score, true)[..])?;
                    Ok(())
                }
                None => {
                    log::error!("corrupt score record for pair ({frame_a}, {frame_b})");
                    Ok(())
                }
            },
            None => {
                log::warn!("no score recorded for pair ({frame_a}, {frame_b})");
                Ok(())
            }
        }
    }

    fn take_next_frame_id(&self) -> u64 {
        let mut next = self.next_frame_id.lock().unwrap();
        let frame_id = *next;
        *next += 1;
        frame_id
    }

    fn register_persistent(&self, db: &sled::Db, path: &Path) -> (u64, bool) {
        let key = encoding::frame_key(&path.to_string_lossy());

        // Registration is effectively single-writer (the walk task), but the
        // ID counter lock makes the check-then-insert safe regardless.
        let mut next = self.next_frame_id.lock().unwrap();

        match db.get(&key) {
            Ok(Some(value)) => {
                if let Some(frame_id) = encoding::decode_frame_value(&value) {
                    return (frame_id, true);
                }
                log::error!("corrupt frame record for '{}'", path.display());
            }
            Ok(None) => {}
            Err(err) => {
                log::error!("frame lookup for '{}' failed: {err}", path.display());
            }
        }

        let frame_id = *next;
        *next += 1;

        if let Err(err) = db.insert(key, &encoding::frame_value(frame_id)[..]) {
            log::error!("failed to register '{}': {err}", path.display());
        }

        (frame_id, false)
    }

    /// Highest frame ID currently on disk, or 0 for an empty store.
    fn max_frame_id(&self) -> Result<u64, StateError> {
        let db = self.db.as_ref().ok_or(StateError::NotPersistent)?;
        let mut max_id = 0;

        for item in db.scan_prefix(encoding::FRAME_PREFIX) {
            let (key, value) = item?;
            match encoding::decode_frame_value(&value) {
                Some(frame_id) => max_id = max_id.max(frame_id),
                None => log::warn!(
                    "skipping corrupt frame record for '{}'",
                    encoding::frame_key_path(&key).display()
                ),
            }
        }

        Ok(max_id)
    }
}

fn ordered_pair(frame_a: u64, frame_b: u64) -> (u64, u64) {
    if frame_a <= frame_b {
        (frame_a, frame_b)
    } else {
        (frame_b, frame_a)
    }
}
