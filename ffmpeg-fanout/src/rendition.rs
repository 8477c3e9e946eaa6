use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One output variant of a run: geometry, codecs, bitrates and container.
///
/// Frame rate, audio sample rate and channel count are not configurable;
/// they always follow the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionSpec {
    /// Relative paths are resolved against the run's output directory.
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Muxer name, e.g. "mp4" or "3gp".
    pub container: String,
    pub video_codec: String,
    pub video_bitrate: u64,
    pub audio_codec: String,
    pub audio_bitrate: u64,
    /// GOP length in frames; the encoder default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyframe_interval: Option<u32>,
    /// Private encoder options, e.g. `{"preset": "veryfast"}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub video_options: BTreeMap<String, String>,
}

impl RenditionSpec {
    pub fn new(output_path: impl Into<PathBuf>, width: u32, height: u32, container: &str) -> Self {
        Self {
            output_path: output_path.into(),
            width,
            height,
            container: container.to_string(),
            video_codec: "h264".to_string(),
            video_bitrate: 1_000_000,
            audio_codec: "aac".to_string(),
            audio_bitrate: 128_000,
            keyframe_interval: None,
            video_options: BTreeMap::new(),
        }
    }

    pub fn with_video(mut self, codec: &str, bitrate: u64) -> Self {
        self.video_codec = codec.to_string();
        self.video_bitrate = bitrate;
        self
    }

    pub fn with_audio(mut self, codec: &str, bitrate: u64) -> Self {
        self.audio_codec = codec.to_string();
        self.audio_bitrate = bitrate;
        self
    }

    /// Short name used in logs and reports: the output file name.
    pub fn name(&self) -> String {
        self.output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.output_path.display().to_string())
    }

    /// Copy of this spec whose output path is anchored in `dir`.
    pub fn resolved_in(&self, dir: &Path) -> Self {
        let mut spec = self.clone();
        if spec.output_path.is_relative() {
            spec.output_path = dir.join(&self.output_path);
        }
        spec
    }
}

/// The stock three-rung ladder: 1080p and 720p MP4 plus a 360p 3GP, all
/// H.264 with 128 kb/s AAC.
pub fn default_ladder() -> Vec<RenditionSpec> {
    vec![
        RenditionSpec::new("output_1080p.mp4", 1920, 1080, "mp4")
            .with_video("h264", 6_000_000)
            .with_audio("aac", 128_000),
        RenditionSpec::new("output_720p.mp4", 1280, 720, "mp4")
            .with_video("h264", 3_000_000)
            .with_audio("aac", 128_000),
        RenditionSpec::new("output_360p.3gp", 640, 360, "3gp")
            .with_video("h264", 600_000)
            .with_audio("aac", 128_000),
    ]
}
