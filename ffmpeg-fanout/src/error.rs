//! Error taxonomy shared by the source, the sinks and the pipeline.

use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The input could not be opened or has nothing to decode.
    #[error("cannot open input {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// The source failed while demuxing or decoding. Fatal to the run.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A rendition could not open its muxer or encoders.
    #[error("cannot start rendition {rendition}: {reason}")]
    EncoderOpen { rendition: String, reason: String },

    /// A single frame or audio block was rejected by one rendition.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Resizing a frame for one rendition failed.
    #[error("resize failed: {0}")]
    Transform(String),

    /// Flushing encoders or writing the container trailer failed.
    #[error("flush failed: {0}")]
    Flush(String),

    /// A sink or pipeline was driven out of its lifecycle order.
    #[error("{subject} cannot {action} while {state}")]
    InvalidState {
        subject: String,
        action: &'static str,
        state: &'static str,
    },
}

impl Error {
    pub fn open(path: impl Into<PathBuf>, reason: impl Display) -> Self {
        Self::Open {
            path: path.into(),
            reason: format!("{:#}", reason),
        }
    }

    pub fn decode(reason: impl Display) -> Self {
        Self::Decode(format!("{:#}", reason))
    }

    pub fn encoder_open(rendition: impl Into<String>, reason: impl Display) -> Self {
        Self::EncoderOpen {
            rendition: rendition.into(),
            reason: format!("{:#}", reason),
        }
    }

    pub fn encode(reason: impl Display) -> Self {
        Self::Encode(format!("{:#}", reason))
    }

    pub fn flush(reason: impl Display) -> Self {
        Self::Flush(format!("{:#}", reason))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anyhow_chain_is_kept_in_reason() {
        let err = anyhow::anyhow!("codec not found: libfoo").context("open video encoder");
        let err = Error::encoder_open("output_720p.mp4", err);
        let text = err.to_string();
        assert!(text.contains("output_720p.mp4"));
        assert!(text.contains("open video encoder"));
        assert!(text.contains("codec not found: libfoo"));
    }
}
