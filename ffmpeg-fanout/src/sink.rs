use std::path::PathBuf;

use anyhow::Context as _;

use crate::{
    encoder::{AudioEncoder, VideoEncoder},
    error::{Error, Result},
    frame::{RawAudioFrame, RawVideoFrame},
    metadata::SourceDescriptor,
    output::AvOutput,
    rendition::RenditionSpec,
    timeline::Timeline,
};

/// Lifecycle of a sink. `Started` is entered at most once and never
/// re-entered; `Released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Created,
    Started,
    Stopped,
    Released,
}

impl SinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkState::Created => "created",
            SinkState::Started => "started",
            SinkState::Stopped => "stopped",
            SinkState::Released => "released",
        }
    }
}

/// One encode destination. Receives already-resized video frames and the
/// source's audio blocks unchanged.
pub trait RenditionSink {
    fn spec(&self) -> &RenditionSpec;

    /// Opens the muxer and encoders. Called once, before any consume call.
    fn start(&mut self) -> Result<()>;

    /// `frame` has exactly the spec's target dimensions.
    fn consume_video(&mut self, frame: RawVideoFrame) -> Result<()>;

    /// `sample_rate` and `channels` describe `block` and must match the source.
    fn consume_audio(&mut self, sample_rate: u32, channels: u16, block: &RawAudioFrame)
    -> Result<()>;

    /// Flushes encoders and finalises the output.
    fn stop(&mut self) -> Result<()>;

    /// Drops every native resource. Valid in any state, idempotent.
    fn release(&mut self);
}

/// Builds one sink per rendition for a run.
pub trait SinkFactory {
    type Sink: RenditionSink;

    fn create(&self, spec: &RenditionSpec, source: &SourceDescriptor) -> Self::Sink;
}

struct Encoding {
    output: AvOutput,
    video: VideoEncoder,
    audio: Option<AudioEncoder>,
    timeline: Timeline,
}

impl Encoding {
    fn open(spec: &RenditionSpec, source: &SourceDescriptor) -> anyhow::Result<Self> {
        let mut output = AvOutput::new(&spec.output_path, &spec.container)
            .with_context(|| format!("open {} muxer for {}", spec.container, spec.output_path.display()))?;
        let video = VideoEncoder::open(&mut output, spec, source.frame_rate())
            .with_context(|| format!("open video encoder {}", spec.video_codec))?;
        let audio = match &source.audio {
            Some(audio) => Some(
                AudioEncoder::open(&mut output, spec, audio)
                    .with_context(|| format!("open audio encoder {}", spec.audio_codec))?,
            ),
            None => None,
        };
        output.write_header().context("write container header")?;
        Ok(Self {
            output,
            video,
            audio,
            timeline: Timeline::new(),
        })
    }

    /// Flushes both encoders and writes the trailer. Every step is attempted;
    /// the first error is returned.
    fn finish(&mut self) -> anyhow::Result<()> {
        let video = self
            .video
            .finish(&mut self.output)
            .context("flush video encoder");
        let audio = match self.audio.as_mut() {
            Some(audio) => audio
                .finish(&mut self.timeline, &mut self.output)
                .context("flush audio encoder"),
            None => Ok(()),
        };
        let trailer = self.output.finish().context("write trailer");
        video.and(audio).and(trailer)
    }
}

/// Writes one rendition to a file through FFmpeg.
pub struct FileRenditionSink {
    spec: RenditionSpec,
    source: SourceDescriptor,
    state: SinkState,
    encoding: Option<Encoding>,
}

impl FileRenditionSink {
    pub fn new(spec: RenditionSpec, source: SourceDescriptor) -> Self {
        Self {
            spec,
            source,
            state: SinkState::Created,
            encoding: None,
        }
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidState {
            subject: format!("rendition {}", self.spec.name()),
            action,
            state: self.state.as_str(),
        }
    }

    fn encoding(&mut self, action: &'static str) -> Result<&mut Encoding> {
        if self.state != SinkState::Started {
            return Err(self.invalid(action));
        }
        let name = self.spec.name();
        self.encoding
            .as_mut()
            .ok_or_else(|| Error::encode(format!("{}: encoders not open", name)))
    }
}

impl RenditionSink for FileRenditionSink {
    fn spec(&self) -> &RenditionSpec {
        &self.spec
    }

    fn start(&mut self) -> Result<()> {
        if self.state != SinkState::Created {
            return Err(self.invalid("start"));
        }
        let encoding = Encoding::open(&self.spec, &self.source)
            .map_err(|e| Error::encoder_open(self.spec.name(), e))?;
        self.encoding = Some(encoding);
        self.state = SinkState::Started;
        log::info!(
            "rendition {} started: {}x{} {} -> {}",
            self.spec.name(),
            self.spec.width,
            self.spec.height,
            self.spec.container,
            self.spec.output_path.display()
        );
        Ok(())
    }

    fn consume_video(&mut self, frame: RawVideoFrame) -> Result<()> {
        let encoding = self.encoding("consume video")?;
        encoding
            .video
            .encode(frame, &mut encoding.timeline, &mut encoding.output)
            .map_err(Error::encode)
    }

    fn consume_audio(
        &mut self,
        sample_rate: u32,
        channels: u16,
        block: &RawAudioFrame,
    ) -> Result<()> {
        let expected = self
            .source
            .audio
            .as_ref()
            .map(|audio| (audio.sample_rate, audio.channels));
        let encoding = self.encoding("consume audio")?;
        let (expected_rate, expected_channels) = match expected {
            Some(expected) => expected,
            None => return Err(Error::encode("source has no audio stream")),
        };
        if sample_rate != expected_rate || channels != expected_channels {
            return Err(Error::encode(format!(
                "audio block is {} Hz/{} ch, source is {} Hz/{} ch",
                sample_rate, channels, expected_rate, expected_channels
            )));
        }
        let audio = match encoding.audio.as_mut() {
            Some(audio) => audio,
            None => return Err(Error::encode("audio encoder not open")),
        };
        audio
            .encode(block, &mut encoding.timeline, &mut encoding.output)
            .map_err(Error::encode)
    }

    fn stop(&mut self) -> Result<()> {
        if self.state != SinkState::Started {
            return Err(self.invalid("stop"));
        }
        self.state = SinkState::Stopped;
        let result = match self.encoding.as_mut() {
            Some(encoding) => encoding.finish(),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                log::info!("rendition {} finished", self.spec.name());
                Ok(())
            }
            Err(e) => Err(Error::flush(e)),
        }
    }

    fn release(&mut self) {
        if self.state == SinkState::Released {
            return;
        }
        log::debug!("rendition {} released from {}", self.spec.name(), self.state.as_str());
        self.encoding.take();
        self.state = SinkState::Released;
    }
}

impl Drop for FileRenditionSink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Creates [`FileRenditionSink`]s writing under one output directory.
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    output_dir: PathBuf,
}

impl FileSinkFactory {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl SinkFactory for FileSinkFactory {
    type Sink = FileRenditionSink;

    fn create(&self, spec: &RenditionSpec, source: &SourceDescriptor) -> FileRenditionSink {
        FileRenditionSink::new(spec.resolved_in(&self.output_dir), source.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use ffmpeg_next::Rational;

    fn descriptor() -> SourceDescriptor {
        SourceDescriptor::new(320, 240, Rational(25, 1), None, "mp4")
    }

    #[test]
    fn test_consume_before_start_is_rejected() {
        let mut sink = FileRenditionSink::new(RenditionSpec::new("a.mp4", 64, 36, "mp4"), descriptor());
        let frame = RawVideoFrame::new(
            ffmpeg_next::frame::Video::new(ffmpeg_next::format::Pixel::YUV420P, 64, 36),
            Rational(1, 25),
        );
        let err = sink.consume_video(frame).err();
        assert!(matches!(err, Some(Error::InvalidState { action: "consume video", .. })));
        assert!(matches!(sink.stop(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_start_failure_is_encoder_open_error() -> anyhow::Result<()> {
        ffmpeg_next::init()?;
        let dir = tempfile::tempdir()?;
        let spec = RenditionSpec::new("bad.mp4", 64, 36, "mp4").with_video("no-such-codec", 100_000);
        let factory = FileSinkFactory::new(dir.path());
        let mut sink = factory.create(&spec, &descriptor());

        let err = sink.start().err();
        assert!(matches!(err, Some(Error::EncoderOpen { .. })), "{:?}", err);
        assert_eq!(sink.state(), SinkState::Created);
        // a failed start never enters Started, so it cannot be retried into it either
        sink.release();
        assert_eq!(sink.state(), SinkState::Released);
        assert!(matches!(sink.start(), Err(Error::InvalidState { .. })));
        Ok(())
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut sink = FileRenditionSink::new(RenditionSpec::new("a.mp4", 64, 36, "mp4"), descriptor());
        sink.release();
        sink.release();
        assert_eq!(sink.state(), SinkState::Released);
    }

    #[test]
    fn test_factory_resolves_output_path() {
        let factory = FileSinkFactory::new("/tmp/renditions");
        let sink = factory.create(&RenditionSpec::new("x.3gp", 64, 36, "3gp"), &descriptor());
        assert_eq!(sink.spec().output_path, Path::new("/tmp/renditions/x.3gp"));
    }
}
