//! Bucket report: one JSON object per bucket with two or more members.

use crate::buckets::BucketTable;
use crate::state::State;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketReport {
    pub bucket: u64,
    pub files: Vec<String>,
}

/// Collect the reportable buckets, resolving frame IDs back to the video
/// paths seen during the run. Buckets with fewer than two members carry no
/// information and are dropped.
pub fn bucket_reports(state: &State, buckets: &BucketTable) -> Vec<BucketReport> {
    buckets
        .groups()
        .into_iter()
        .filter(|(_, frames)| frames.len() >= 2)
        .map(|(bucket, frames)| BucketReport {
            bucket,
            files: frames
                .into_iter()
                .filter_map(|frame_id| state.video_path(frame_id))
                .map(|path| path.to_string_lossy().into_owned())
                .collect(),
        })
        .collect()
}

/// Write the report as a JSON list. No qualifying bucket means no output at
/// all, not an empty list.
pub fn write_report<W: Write>(mut writer: W, reports: &[BucketReport]) -> io::Result<()> {
    if reports.is_empty() {
        return Ok(());
    }

    serde_json::to_writer_pretty(&mut writer, reports)?;
    writeln!(writer)?;
    Ok(())
}
