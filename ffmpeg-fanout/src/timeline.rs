//! Maps source presentation timestamps onto one rendition's encoder clocks.
//!
//! The first frame of either kind fixes the run origin; video and audio are
//! both expressed relative to it so they stay aligned in the output.

use ffmpeg_next::{Rational, Rescale};

const MICROS: Rational = Rational(1, 1_000_000);

#[derive(Debug, Default)]
pub struct Timeline {
    origin_us: Option<i64>,
    last_video_pts: Option<i64>,
    next_audio_pts: Option<i64>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn offset_us(&mut self, pts: Option<i64>, time_base: Rational) -> Option<i64> {
        let pts_us = pts?.rescale(time_base, MICROS);
        let origin = *self.origin_us.get_or_insert(pts_us);
        Some((pts_us - origin).max(0))
    }

    /// Pts for the next video frame in `encoder_tb`. Strictly increasing;
    /// frames without a timestamp, or whose timestamp would not advance,
    /// take the slot after the previous frame.
    pub fn video_pts(&mut self, pts: Option<i64>, time_base: Rational, encoder_tb: Rational) -> i64 {
        let mapped = self
            .offset_us(pts, time_base)
            .map(|offset| offset.rescale(MICROS, encoder_tb));
        let next = match (mapped, self.last_video_pts) {
            (Some(pts), Some(last)) if pts > last => pts,
            (Some(pts), None) => pts,
            (_, Some(last)) => last + 1,
            (None, None) => 0,
        };
        self.last_video_pts = Some(next);
        next
    }

    /// Pts (in samples) of the first audio block; later blocks continue from
    /// the running sample count so encoder input never has gaps or overlaps.
    pub fn audio_start(&mut self, pts: Option<i64>, time_base: Rational, sample_rate: u32) -> i64 {
        if let Some(next) = self.next_audio_pts {
            return next;
        }
        let rate_tb = Rational(1, sample_rate.max(1) as i32);
        let start = self
            .offset_us(pts, time_base)
            .map(|offset| offset.rescale(MICROS, rate_tb))
            .unwrap_or(0);
        self.next_audio_pts = Some(start);
        start
    }

    /// Pts (in samples) for the next block sent to the audio encoder.
    pub fn audio_pts(&self) -> i64 {
        self.next_audio_pts.unwrap_or(0)
    }

    /// Records that `samples` more samples were queued for the encoder.
    pub fn advance_audio(&mut self, samples: usize) {
        if let Some(next) = self.next_audio_pts.as_mut() {
            *next += samples as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_pts_relative_to_first_frame() {
        let mut timeline = Timeline::new();
        let source_tb = Rational(1, 90_000);
        let encoder_tb = Rational(1, 25);

        assert_eq!(timeline.video_pts(Some(180_000), source_tb, encoder_tb), 0);
        assert_eq!(timeline.video_pts(Some(183_600), source_tb, encoder_tb), 1);
        assert_eq!(timeline.video_pts(Some(187_200), source_tb, encoder_tb), 2);
    }

    #[test]
    fn test_video_pts_strictly_increasing() {
        let mut timeline = Timeline::new();
        let tb = Rational(1, 25);

        assert_eq!(timeline.video_pts(Some(10), tb, tb), 0);
        // duplicate and backwards timestamps are pushed forward
        assert_eq!(timeline.video_pts(Some(10), tb, tb), 1);
        assert_eq!(timeline.video_pts(Some(5), tb, tb), 2);
        // missing timestamp
        assert_eq!(timeline.video_pts(None, tb, tb), 3);
        assert_eq!(timeline.video_pts(Some(20), tb, tb), 10);
    }

    #[test]
    fn test_audio_shares_origin_with_video() {
        let mut timeline = Timeline::new();
        let ms = Rational(1, 1000);

        // video starts at 1.0s, audio at 1.5s
        assert_eq!(timeline.video_pts(Some(1000), ms, Rational(1, 25)), 0);
        let start = timeline.audio_start(Some(1500), ms, 48_000);
        assert_eq!(start, 24_000);

        timeline.advance_audio(1024);
        assert_eq!(timeline.audio_start(Some(99_999), ms, 48_000), 25_024);
    }

    #[test]
    fn test_audio_without_pts_starts_at_zero() {
        let mut timeline = Timeline::new();
        assert_eq!(timeline.audio_start(None, Rational(1, 44_100), 44_100), 0);
        timeline.advance_audio(1152);
        assert_eq!(timeline.audio_start(None, Rational(1, 44_100), 44_100), 1152);
    }
}
