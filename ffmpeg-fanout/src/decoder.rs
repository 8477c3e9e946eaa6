use ffmpeg_next::{Rational, codec::packet::Packet};

use crate::{
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    metadata::SourceLayout,
    stream::AvStream,
};

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

impl DecoderType {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), ffmpeg_next::Error> {
        match self {
            DecoderType::Video(video_decoder) => video_decoder.send_packet(packet),
            DecoderType::Audio(audio_decoder) => audio_decoder.send_packet(packet),
        }
    }

    fn send_eof(&mut self) -> anyhow::Result<()> {
        match self {
            DecoderType::Video(video_decoder) => video_decoder.send_eof()?,
            DecoderType::Audio(audio_decoder) => audio_decoder.send_eof()?,
        }
        Ok(())
    }

    fn receive_frame(&mut self, time_base: Rational) -> anyhow::Result<Option<RawFrame>> {
        match self {
            DecoderType::Video(video_decoder) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                match video_decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        let pts = frame.timestamp().or(frame.pts());
                        frame.set_pts(pts);
                        Ok(Some(RawFrame::Video(RawVideoFrame::new(frame, time_base))))
                    }
                    Err(ffmpeg_next::Error::Eof) => Ok(None),
                    Err(ffmpeg_next::Error::Other { errno })
                        if errno == ffmpeg_next::util::error::EAGAIN =>
                    {
                        Ok(None)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            DecoderType::Audio(audio_decoder) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                match audio_decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        let pts = frame.timestamp().or(frame.pts());
                        frame.set_pts(pts);
                        Ok(Some(RawFrame::Audio(RawAudioFrame::new(frame, time_base))))
                    }
                    Err(ffmpeg_next::Error::Eof) => Ok(None),
                    Err(ffmpeg_next::Error::Other { errno })
                        if errno == ffmpeg_next::util::error::EAGAIN =>
                    {
                        Ok(None)
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }
}

/// Outcome of handing one packet to a decoder.
#[derive(Debug, PartialEq, Eq)]
pub enum PacketOutcome {
    Accepted,
    /// The decoder rejected the packet as corrupt; decoding can continue.
    Rejected,
}

/// Decoder for one stream. Frames come out with pts in the stream time base.
pub struct Decoder {
    stream: AvStream,
    inner: DecoderType,
}

impl Decoder {
    pub fn new(stream: &AvStream) -> anyhow::Result<Self> {
        let mut decoder_ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*decoder_ctx.as_mut_ptr()).pkt_timebase = stream.time_base().into();
        }
        decoder_ctx.set_parameters(stream.parameters().clone())?;

        let inner = if stream.is_video() {
            let video_decoder = decoder_ctx.decoder().video()?;
            if video_decoder.format() == ffmpeg_next::format::Pixel::None
                || video_decoder.width() == 0
                || video_decoder.height() == 0
            {
                return Err(anyhow::anyhow!("missing codec parameters"));
            }
            DecoderType::Video(video_decoder)
        } else if stream.is_audio() {
            DecoderType::Audio(decoder_ctx.decoder().audio()?)
        } else {
            return Err(anyhow::anyhow!("unsupported stream type"));
        };

        Ok(Self {
            stream: stream.clone(),
            inner,
        })
    }

    pub fn send_packet(&mut self, packet: &Packet) -> anyhow::Result<PacketOutcome> {
        match self.inner.send_packet(packet) {
            Ok(()) => Ok(PacketOutcome::Accepted),
            Err(ffmpeg_next::Error::InvalidData) => Ok(PacketOutcome::Rejected),
            Err(err) => Err(err.into()),
        }
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()
    }

    pub fn receive_frame(&mut self) -> anyhow::Result<Option<RawFrame>> {
        self.inner.receive_frame(self.stream.time_base())
    }

    /// Receives every frame the decoder can produce right now.
    pub fn drain_into(&mut self, out: &mut impl Extend<RawFrame>) -> anyhow::Result<()> {
        while let Some(frame) = self.receive_frame()? {
            out.extend(Some(frame));
        }
        Ok(())
    }

    /// Sample format the audio decoder produces; `None` for video.
    pub fn sample_format(&self) -> Option<ffmpeg_next::format::Sample> {
        match &self.inner {
            DecoderType::Audio(audio_decoder) => Some(audio_decoder.format()),
            DecoderType::Video(_) => None,
        }
    }

    /// Channel layout the audio decoder reports, or the default layout for
    /// the stream's channel count when the decoder does not know it yet.
    pub fn channel_layout(&self) -> Option<SourceLayout> {
        match &self.inner {
            DecoderType::Audio(audio_decoder) => {
                let raw = unsafe { &(*audio_decoder.as_ptr()).ch_layout };
                if raw.nb_channels > 0 {
                    Some(SourceLayout::copy_from(raw))
                } else {
                    Some(SourceLayout::default_for(self.stream.channels()))
                }
            }
            DecoderType::Video(_) => None,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream.index()
    }
}
