use std::collections::VecDeque;
use std::path::Path;

use ffmpeg_next::codec::packet::Packet;

use crate::{
    decoder::{Decoder, PacketOutcome},
    error::{Error, Result},
    frame::RawFrame,
    metadata::{AudioDescriptor, SourceDescriptor},
    stream::AvStream,
};

/// A finite, non-restartable sequence of decoded frames.
pub trait FrameSource {
    fn descriptor(&self) -> &SourceDescriptor;

    /// Next frame in container order, or `None` once the input is exhausted.
    /// After the first `None` every later call returns `None` too.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Releases demuxer and decoders. Safe to call more than once.
    fn close(&mut self);

    /// Corrupt packets skipped so far.
    fn rejected_packets(&self) -> u64 {
        0
    }
}

/// Opens a [`FrameSource`] for a path.
pub trait SourceOpener {
    type Source: FrameSource;

    fn open(&self, path: &Path) -> Result<Self::Source>;
}

/// Opens inputs through FFmpeg's demuxers and decoders.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileOpener;

impl SourceOpener for FileOpener {
    type Source = FileSource;

    fn open(&self, path: &Path) -> Result<FileSource> {
        FileSource::open(path)
    }
}

/// Demuxes one file and decodes its best video stream and, when present,
/// its best audio stream.
pub struct FileSource {
    inner: Option<ffmpeg_next::format::context::Input>,
    video: Option<Decoder>,
    audio: Option<Decoder>,
    descriptor: SourceDescriptor,
    pending: VecDeque<RawFrame>,
    exhausted: bool,
    rejected_packets: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let input = ffmpeg_next::format::input(&path).map_err(|e| Error::open(path, e))?;

        let video_stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .map(AvStream::from)
            .ok_or_else(|| Error::open(path, "no video stream"))?;
        let audio_stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Audio)
            .map(AvStream::from);

        let video = Decoder::new(&video_stream).map_err(|e| Error::open(path, e))?;
        let audio = match audio_stream {
            Some(ref stream) => match Decoder::new(stream) {
                Ok(decoder) => Some(decoder),
                Err(e) => {
                    log::warn!(
                        "audio stream {} is not decodable, continuing without audio: {:#}",
                        stream.index(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let audio_descriptor = match (&audio, &audio_stream) {
            (Some(decoder), Some(stream)) => {
                match (decoder.sample_format(), decoder.channel_layout()) {
                    (Some(sample_format), Some(layout)) => {
                        Some(AudioDescriptor::new(stream.sample_rate(), sample_format, layout))
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        let descriptor = SourceDescriptor::new(
            video_stream.width(),
            video_stream.height(),
            video_stream.rate(),
            audio_descriptor,
            input.format().name(),
        );

        Ok(Self {
            inner: Some(input),
            video: Some(video),
            audio,
            descriptor,
            pending: VecDeque::new(),
            exhausted: false,
            rejected_packets: 0,
        })
    }

    fn decoder_for(&mut self, stream_index: usize) -> Option<&mut Decoder> {
        if self.video.as_ref().map(|d| d.stream_index()) == Some(stream_index) {
            return self.video.as_mut();
        }
        if self.audio.as_ref().map(|d| d.stream_index()) == Some(stream_index) {
            return self.audio.as_mut();
        }
        None
    }

    /// Reads one packet and decodes it. Returns false at end of input.
    fn read_packet(&mut self) -> anyhow::Result<bool> {
        let input = match self.inner.as_mut() {
            Some(input) => input,
            None => return Ok(false),
        };

        let mut packet = Packet::empty();
        match packet.read(input) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Eof) => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        let mut pending = std::mem::take(&mut self.pending);
        let mut rejected = false;
        if let Some(decoder) = self.decoder_for(packet.stream()) {
            if decoder.send_packet(&packet)? == PacketOutcome::Rejected {
                rejected = true;
            }
            decoder.drain_into(&mut pending)?;
        }
        self.pending = pending;

        if rejected {
            self.rejected_packets += 1;
            log::warn!(
                "skipping corrupt packet on stream {} (pts {:?})",
                packet.stream(),
                packet.pts()
            );
        }
        Ok(true)
    }

    /// Flushes both decoders so delayed frames come out.
    fn drain_decoders(&mut self) -> anyhow::Result<()> {
        for decoder in [self.video.as_mut(), self.audio.as_mut()].into_iter().flatten() {
            decoder.send_eof()?;
            decoder.drain_into(&mut self.pending)?;
        }
        Ok(())
    }
}

impl FrameSource for FileSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.exhausted {
                return Ok(None);
            }

            let more = match self.read_packet() {
                Ok(more) => more,
                Err(e) => {
                    self.exhausted = true;
                    return Err(Error::decode(e));
                }
            };
            if !more {
                self.exhausted = true;
                if let Err(e) = self.drain_decoders() {
                    return Err(Error::decode(e));
                }
            }
        }
    }

    fn close(&mut self) {
        self.pending.clear();
        self.exhausted = true;
        let had_input = self.inner.is_some();
        self.video.take();
        self.audio.take();
        self.inner.take();
        if had_input {
            log::debug!(
                "input closed: {}, {} corrupt packets skipped",
                self.descriptor.format_name,
                self.rejected_packets
            );
        }
    }

    fn rejected_packets(&self) -> u64 {
        self.rejected_packets
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use ffmpeg_next::Rational;

    use super::*;
    use crate::metadata::SourceLayout;
    use crate::test_media::{self, encoders_available};

    const FRAMES: i64 = 40;

    fn count_frames(source: &mut FileSource) -> anyhow::Result<(usize, usize)> {
        let (mut video, mut audio) = (0, 0);
        while let Some(frame) = source.next_frame()? {
            match frame {
                RawFrame::Video(_) => video += 1,
                RawFrame::Audio(_) => audio += 1,
            }
        }
        Ok((video, audio))
    }

    #[test]
    fn test_decodes_every_written_frame() -> anyhow::Result<()> {
        crate::init(log::LevelFilter::Warn)?;
        if !encoders_available() {
            eprintln!("skip: mpeg4/aac encoders not available");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mp4");
        test_media::write_source(&path, FRAMES)?;

        let mut source = FileSource::open(&path)?;
        let descriptor = source.descriptor().clone();
        assert_eq!((descriptor.width, descriptor.height), (test_media::WIDTH, test_media::HEIGHT));
        assert_eq!(descriptor.frame_rate(), Rational(test_media::FPS, 1));
        let audio = descriptor.audio.ok_or(anyhow::anyhow!("audio stream not found"))?;
        assert_eq!(audio.sample_rate, test_media::SAMPLE_RATE);
        assert_eq!(audio.layout, SourceLayout::default_for(2));

        // B-frames hold the last pictures back until the decoder is flushed
        let (video, audio_blocks) = count_frames(&mut source)?;
        assert_eq!(video, FRAMES as usize);
        assert!(audio_blocks > 0);
        assert_eq!(source.rejected_packets(), 0);
        Ok(())
    }

    #[test]
    fn test_end_of_stream_is_sticky() -> anyhow::Result<()> {
        crate::init(log::LevelFilter::Warn)?;
        if !encoders_available() {
            eprintln!("skip: mpeg4/aac encoders not available");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mp4");
        test_media::write_source(&path, 5)?;

        let mut source = FileSource::open(&path)?;
        count_frames(&mut source)?;
        for _ in 0..3 {
            assert!(source.next_frame()?.is_none());
        }
        Ok(())
    }

    #[test]
    fn test_close_is_idempotent_and_ends_the_stream() -> anyhow::Result<()> {
        crate::init(log::LevelFilter::Warn)?;
        if !encoders_available() {
            eprintln!("skip: mpeg4/aac encoders not available");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clip.mp4");
        test_media::write_source(&path, 10)?;

        let mut source = FileSource::open(&path)?;
        assert!(source.next_frame()?.is_some());
        source.close();
        source.close();
        assert!(source.next_frame()?.is_none());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn test_audio_only_file_is_open_error() -> anyhow::Result<()> {
        crate::init(log::LevelFilter::Warn)?;
        if ffmpeg_next::encoder::find_by_name("aac").is_none() {
            eprintln!("skip: aac encoder not available");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tone.m4a");
        test_media::write_audio_only(&path, 20)?;

        match FileSource::open(&path) {
            Err(Error::Open { reason, .. }) => assert!(reason.contains("no video stream"), "{}", reason),
            Err(other) => panic!("expected an open error, got {:?}", other),
            Ok(_) => panic!("audio-only file opened as a video source"),
        }
        Ok(())
    }
}
