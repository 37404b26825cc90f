//! Greedy assignment of matching frames into buckets.
//!
//! Assignment is deliberately order-dependent: when a match arrives and
//! neither frame has a bucket, a new one is created; when exactly one has,
//! the other joins it. When both frames already sit in different buckets no
//! merge happens -- the second frame is pulled into the first frame's bucket,
//! leaving the rest of its old bucket behind. This mirrors the historical
//! behavior and is a documented limitation, not an optimization.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Frame → bucket table, shared across the comparison consumers. Guarded by
/// a single lock since cache-hit consumption and response draining run on
/// different threads.
pub struct BucketTable {
    inner: Mutex<Inner>,
}

struct Inner {
    assigned: HashMap<u64, u64>,
    next_bucket: u64,
}

impl BucketTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                assigned: HashMap::new(),
                next_bucket: 1,
            }),
        }
    }

    /// Consume one match signal for a pair of frames.
    pub fn record_match(&self, frame_a: u64, frame_b: u64) {
        let mut inner = self.inner.lock().unwrap();

        let bucket = match (
            inner.assigned.get(&frame_a).copied(),
            inner.assigned.get(&frame_b).copied(),
        ) {
            (Some(bucket), _) => bucket,
            (None, Some(bucket)) => bucket,
            (None, None) => {
                let bucket = inner.next_bucket;
                inner.next_bucket += 1;
                bucket
            }
        };

        inner.assigned.insert(frame_a, bucket);
        inner.assigned.insert(frame_b, bucket);
    }

    /// Bucket → member frames, ordered for deterministic reporting.
    pub fn groups(&self) -> BTreeMap<u64, Vec<u64>> {
        let inner = self.inner.lock().unwrap();
        let mut groups: BTreeMap<u64, Vec<u64>> = BTreeMap::new();

        for (&frame_id, &bucket) in &inner.assigned {
            groups.entry(bucket).or_default().push(frame_id);
        }

        for frames in groups.values_mut() {
            frames.sort_unstable();
        }

        groups
    }
}

impl Default for BucketTable {
    fn default() -> Self {
        Self::new()
    }
}
