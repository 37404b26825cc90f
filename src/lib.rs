//! vidmatch: find visually similar video files.
//!
//! One representative thumbnail is extracted per video, thumbnails are
//! compared pairwise through a perceptual similarity oracle, and matching
//! files are clustered into buckets. Scores are cached in an embedded store
//! so repeated runs over a mostly-unchanged collection skip the O(n²)
//! recomputation.

pub mod buckets;
pub mod compare;
pub mod config;
pub mod extract;
pub mod oracle;
pub mod processor;
pub mod report;
pub mod state;
pub mod stats;

pub use config::{DEFAULT_CHR_TOLERANCE, DEFAULT_PROP_TOLERANCE, ProcessorConfig};
pub use processor::{ProcessError, Processor, RunReport};
pub use report::{BucketReport, write_report};
pub use state::CompactionSummary;
