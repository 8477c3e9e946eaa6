use serde::Serialize;

use crate::rendition::RenditionSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenditionOutcome {
    Success,
    /// Carries the first failure seen for the rendition.
    Failure { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RenditionReport {
    pub spec: RenditionSpec,
    pub outcome: RenditionOutcome,
    /// Video frames the sink accepted.
    pub video_frames: u64,
    /// Audio blocks the sink accepted.
    pub audio_blocks: u64,
    /// Rejected frames and blocks, plus a failed start or stop.
    pub failures: u64,
    /// Set when the sink stopped being fed after its first failure.
    pub disabled: bool,
}

impl RenditionReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RenditionOutcome::Success
    }
}

/// Result of one run, one entry per rendition in ladder order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Video frames pulled from the source.
    pub total_frames_processed: u64,
    pub audio_blocks_processed: u64,
    pub renditions: Vec<RenditionReport>,
    /// Corrupt packets the source skipped.
    pub rejected_packets: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.source_error.is_none()
            && !self.cancelled
            && self.renditions.iter().all(RenditionReport::is_success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &RenditionReport> {
        self.renditions.iter().filter(|r| !r.is_success())
    }
}
