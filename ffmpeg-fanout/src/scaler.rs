use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, Flags};

use crate::error::{Error, Result};
use crate::frame::RawVideoFrame;

/// Pixel format every rendition encodes from.
pub const OUTPUT_PIXEL_FORMAT: Pixel = Pixel::YUV420P;

/// Interpolation used for every resize in a run.
pub const INTERPOLATION: Flags = Flags::BILINEAR;

/// Produces a copy of a video frame in the target geometry. The input frame
/// is never modified.
pub trait FrameTransform {
    fn resize(&mut self, frame: &RawVideoFrame, width: u32, height: u32)
    -> Result<RawVideoFrame>;
}

struct Scaler {
    context: Context,
    input: (Pixel, u32, u32),
    output: (u32, u32),
}

impl Scaler {
    fn new(input: (Pixel, u32, u32), output: (u32, u32)) -> anyhow::Result<Self> {
        let context = Context::get(
            input.0,
            input.1,
            input.2,
            OUTPUT_PIXEL_FORMAT,
            output.0,
            output.1,
            INTERPOLATION,
        )?;
        Ok(Self {
            context,
            input,
            output,
        })
    }

    fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}

/// swscale-backed transform. Converts to [`OUTPUT_PIXEL_FORMAT`] with
/// bilinear interpolation. Keeps one scaling context, rebuilt whenever the
/// input or target geometry changes.
#[derive(Default)]
pub struct SwsTransform {
    scaler: Option<Scaler>,
}

impl SwsTransform {
    pub fn new() -> Self {
        Self::default()
    }

    fn scaler_for(&mut self, frame: &RawVideoFrame, width: u32, height: u32) -> Result<&mut Scaler> {
        let input = (frame.format(), frame.width(), frame.height());
        let output = (width, height);
        let stale = match &self.scaler {
            Some(scaler) => scaler.input != input || scaler.output != output,
            None => true,
        };
        if stale {
            let scaler = Scaler::new(input, output).map_err(|e| {
                Error::Transform(format!(
                    "{:?} {}x{} -> {}x{}: {:#}",
                    input.0, input.1, input.2, width, height, e
                ))
            })?;
            self.scaler = Some(scaler);
        }
        match self.scaler.as_mut() {
            Some(scaler) => Ok(scaler),
            None => Err(Error::Transform("scaler not initialised".to_string())),
        }
    }
}

impl FrameTransform for SwsTransform {
    fn resize(
        &mut self,
        frame: &RawVideoFrame,
        width: u32,
        height: u32,
    ) -> Result<RawVideoFrame> {
        if frame.width() == width && frame.height() == height && frame.format() == OUTPUT_PIXEL_FORMAT
        {
            return Ok(frame.clone());
        }

        let scaler = self.scaler_for(frame, width, height)?;
        let mut scaled = ffmpeg_next::frame::Video::empty();
        scaler
            .run(frame.as_video(), &mut scaled)
            .map_err(|e| Error::Transform(format!("{:#}", e)))?;
        scaled.set_pts(frame.pts());
        Ok(RawVideoFrame::new(scaled, frame.time_base()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::Rational;

    fn pattern_frame(width: u32, height: u32) -> RawVideoFrame {
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, width, height);
        for plane in 0..frame.planes() {
            let stride = frame.stride(plane);
            for (i, b) in frame.data_mut(plane).iter_mut().enumerate() {
                *b = ((i % stride) as u8).wrapping_mul(7).wrapping_add(plane as u8 * 31);
            }
        }
        frame.set_pts(Some(42));
        RawVideoFrame::new(frame, Rational(1, 25))
    }

    #[test]
    fn test_resize_to_same_geometry_is_identity() -> anyhow::Result<()> {
        let source = pattern_frame(64, 36);
        let mut transform = SwsTransform::new();

        let resized = transform.resize(&source, 64, 36)?;
        assert_eq!(resized.width(), 64);
        assert_eq!(resized.height(), 36);
        assert_eq!(resized.pts(), Some(42));
        for plane in 0..source.planes() {
            assert_eq!(resized.plane(plane), source.plane(plane), "plane {} differs", plane);
        }
        Ok(())
    }

    #[test]
    fn test_resize_produces_target_geometry() -> anyhow::Result<()> {
        let source = pattern_frame(64, 36);
        let mut transform = SwsTransform::new();

        let down = transform.resize(&source, 32, 18)?;
        assert_eq!((down.width(), down.height()), (32, 18));
        assert_eq!(down.format(), OUTPUT_PIXEL_FORMAT);
        assert_eq!(down.pts(), Some(42));
        assert_eq!(down.time_base(), Rational(1, 25));

        let up = transform.resize(&source, 128, 72)?;
        assert_eq!((up.width(), up.height()), (128, 72));
        Ok(())
    }

    #[test]
    fn test_resize_leaves_input_untouched() -> anyhow::Result<()> {
        let source = pattern_frame(64, 36);
        let before: Vec<_> = (0..source.planes()).map(|p| source.plane(p)).collect();

        let mut transform = SwsTransform::new();
        transform.resize(&source, 32, 18)?;
        transform.resize(&source, 64, 36)?;

        let after: Vec<_> = (0..source.planes()).map(|p| source.plane(p)).collect();
        assert_eq!(before, after);
        Ok(())
    }

    #[test]
    fn test_converts_pixel_format_at_same_geometry() -> anyhow::Result<()> {
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::RGB24, 32, 16);
        frame.data_mut(0).fill(128);
        let source = RawVideoFrame::new(frame, Rational(1, 30));

        let mut transform = SwsTransform::new();
        let converted = transform.resize(&source, 32, 16)?;
        assert_eq!(converted.format(), OUTPUT_PIXEL_FORMAT);
        assert_eq!((converted.width(), converted.height()), (32, 16));
        Ok(())
    }
}
