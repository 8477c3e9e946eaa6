use ffmpeg_next::{
    Dictionary, Rational, codec::packet::Packet, ffi, format::Sample, picture,
    software::resampling,
};

use crate::{
    fifo::{MAX_PLANES, SampleFifo},
    frame::{RawAudioFrame, RawVideoFrame},
    metadata::{AudioDescriptor, SourceLayout},
    output::AvOutput,
    rendition::RenditionSpec,
    scaler::OUTPUT_PIXEL_FORMAT,
    timeline::Timeline,
};

fn find_encoder(name: &str) -> anyhow::Result<ffmpeg_next::Codec> {
    use ffmpeg_next::codec::Id;

    if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
        return Ok(codec);
    }
    // codec names pick whichever encoder FFmpeg has registered for them
    let id = match name {
        "h264" | "avc" => Id::H264,
        "hevc" | "h265" => Id::HEVC,
        "mpeg4" => Id::MPEG4,
        "vp8" => Id::VP8,
        "vp9" => Id::VP9,
        "av1" => Id::AV1,
        "aac" => Id::AAC,
        "mp3" => Id::MP3,
        "opus" => Id::OPUS,
        "amr_nb" | "amrnb" => Id::AMR_NB,
        _ => Id::None,
    };
    ffmpeg_next::encoder::find(id).ok_or(anyhow::anyhow!("codec not found: {}", name))
}

/// Pulls every packet the encoder has ready and hands it to the muxer.
fn drain_packets(
    receive: &mut dyn FnMut(&mut Packet) -> Result<(), ffmpeg_next::Error>,
    output: &mut AvOutput,
    stream_index: usize,
    time_base: Rational,
) -> anyhow::Result<usize> {
    let mut written = 0;
    loop {
        let mut packet = Packet::empty();
        match receive(&mut packet) {
            Ok(()) => {
                output.write_packet(stream_index, packet, time_base)?;
                written += 1;
            }
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                return Ok(written);
            }
            Err(ffmpeg_next::Error::Eof) => return Ok(written),
            Err(err) => return Err(err.into()),
        }
    }
}

pub struct VideoEncoder {
    inner: ffmpeg_next::codec::encoder::video::Encoder,
    stream_index: usize,
    encoder_time_base: Rational,
    width: u32,
    height: u32,
}

impl VideoEncoder {
    /// Opens the video encoder for `spec` at the source frame rate and adds
    /// its stream to `output`.
    pub fn open(
        output: &mut AvOutput,
        spec: &RenditionSpec,
        frame_rate: Rational,
    ) -> anyhow::Result<Self> {
        let codec = find_encoder(&spec.video_codec)?;
        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder.set_width(spec.width);
        encoder.set_height(spec.height);
        encoder.set_format(OUTPUT_PIXEL_FORMAT);
        encoder.set_frame_rate(Some(frame_rate));
        encoder.set_time_base(frame_rate.invert());
        encoder.set_bit_rate(spec.video_bitrate as usize);
        if let Some(gop) = spec.keyframe_interval {
            encoder.set_gop(gop);
        }
        if output.global_header() {
            encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        for (key, value) in &spec.video_options {
            opts.set(key, value);
        }
        let encoder = encoder.open_with(opts)?;
        let encoder_time_base: Rational = unsafe { (*encoder.as_ptr()).time_base.into() };
        let stream_index = output.add_stream(codec, &encoder, encoder_time_base)?;
        log::info!(
            "video encoder opened: {} {}x{} {} bps, time_base {}",
            codec.name(),
            spec.width,
            spec.height,
            spec.video_bitrate,
            encoder_time_base
        );

        Ok(Self {
            inner: encoder,
            stream_index,
            encoder_time_base,
            width: spec.width,
            height: spec.height,
        })
    }

    pub fn encode(
        &mut self,
        mut frame: RawVideoFrame,
        timeline: &mut Timeline,
        output: &mut AvOutput,
    ) -> anyhow::Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            anyhow::bail!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }
        let pts = timeline.video_pts(frame.pts(), frame.time_base(), self.encoder_time_base);
        let f = frame.get_mut();
        f.set_pts(Some(pts));
        f.set_kind(picture::Type::None);
        self.inner.send_frame(f)?;
        self.drain(output)?;
        Ok(())
    }

    pub fn finish(&mut self, output: &mut AvOutput) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        self.drain(output)?;
        Ok(())
    }

    fn drain(&mut self, output: &mut AvOutput) -> anyhow::Result<usize> {
        let inner = &mut self.inner;
        drain_packets(
            &mut |packet| inner.receive_packet(packet),
            output,
            self.stream_index,
            self.encoder_time_base,
        )
    }
}

/// Converts decoded blocks to the encoder's sample format. Rate and channel
/// layout are left as they are.
struct FormatConverter {
    context: resampling::Context,
    input_layout: ffmpeg_next::ChannelLayout,
    output_layout: SourceLayout,
    format: Sample,
    rate: u32,
}

impl FormatConverter {
    fn new(source: &AudioDescriptor, format: Sample) -> anyhow::Result<Self> {
        let layout = source
            .layout
            .mask()
            .or_else(|| SourceLayout::default_for(source.channels).mask())
            .ok_or(anyhow::anyhow!("no channel mask for {} channels", source.channels))?;
        let context = resampling::Context::get(
            source.sample_format,
            layout,
            source.sample_rate,
            format,
            layout,
            source.sample_rate,
        )?;
        let output_layout = SourceLayout::from_mask(layout)
            .ok_or(anyhow::anyhow!("invalid channel mask {:#x}", layout.bits()))?;
        Ok(Self {
            context,
            input_layout: layout,
            output_layout,
            format,
            rate: source.sample_rate,
        })
    }

    fn convert(&mut self, block: &RawAudioFrame) -> anyhow::Result<ffmpeg_next::frame::Audio> {
        let relabelled;
        let mut input = block.as_audio();
        // decoders that leave the order unspecified get the layout the context was built with
        if input.channel_layout() != self.input_layout {
            let mut copy = input.clone();
            copy.set_channel_layout(self.input_layout);
            relabelled = copy;
            input = &relabelled;
        }
        let mut output = alloc_audio(self.format, block.samples(), &self.output_layout, self.rate)?;
        self.context.run(input, &mut output)?;
        Ok(output)
    }
}

pub struct AudioEncoder {
    inner: ffmpeg_next::codec::encoder::audio::Encoder,
    stream_index: usize,
    encoder_time_base: Rational,
    sample_rate: u32,
    source_format: Sample,
    format: Sample,
    layout: SourceLayout,
    converter: Option<FormatConverter>,
    fifo: SampleFifo,
    frame_size: usize,
}

impl AudioEncoder {
    /// Opens the audio encoder for `spec` with the source's rate and channel
    /// layout. When the codec cannot take the source sample format, blocks
    /// are converted to the first format it lists.
    pub fn open(
        output: &mut AvOutput,
        spec: &RenditionSpec,
        source: &AudioDescriptor,
    ) -> anyhow::Result<Self> {
        let codec = find_encoder(&spec.audio_codec)?;
        let format = match codec.audio()?.formats() {
            Some(formats) => {
                let formats: Vec<Sample> = formats.collect();
                if formats.is_empty() || formats.contains(&source.sample_format) {
                    source.sample_format
                } else {
                    formats[0]
                }
            }
            None => source.sample_format,
        };
        if format.is_planar() && source.channels as usize > MAX_PLANES {
            anyhow::bail!(
                "{} channels in planar {:?} exceed the {} planes a frame can hold",
                source.channels,
                format,
                MAX_PLANES
            );
        }
        // an unspecified order is only a channel count; encoders want a real layout
        let layout = if source.layout.is_specified() {
            source.layout.clone()
        } else {
            SourceLayout::default_for(source.channels)
        };

        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .audio()?;
        let time_base = Rational(1, source.sample_rate as i32);
        encoder.set_rate(source.sample_rate as i32);
        encoder.set_format(format);
        encoder.set_bit_rate(spec.audio_bitrate as usize);
        encoder.set_time_base(time_base);
        unsafe {
            let ctx = encoder.as_mut_ptr();
            ffi::av_channel_layout_uninit(&mut (*ctx).ch_layout);
            let ret = ffi::av_channel_layout_copy(&mut (*ctx).ch_layout, layout.as_raw());
            if ret < 0 {
                anyhow::bail!("copy channel layout {}: {}", layout, ffmpeg_next::Error::from(ret));
            }
        }
        if output.global_header() {
            encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder.open_as(codec)?;
        let converter = if format != source.sample_format {
            Some(FormatConverter::new(source, format)?)
        } else {
            None
        };
        let encoder_time_base: Rational = unsafe { (*encoder.as_ptr()).time_base.into() };
        let stream_index = output.add_stream(codec, &encoder, encoder_time_base)?;
        let frame_size = encoder.frame_size() as usize;
        log::info!(
            "audio encoder opened: {} {} Hz {} {:?}{}, {} bps, frame_size {}",
            codec.name(),
            source.sample_rate,
            layout,
            format,
            if converter.is_some() {
                format!(" (from {:?})", source.sample_format)
            } else {
                String::new()
            },
            spec.audio_bitrate,
            frame_size
        );

        Ok(Self {
            inner: encoder,
            stream_index,
            encoder_time_base,
            sample_rate: source.sample_rate,
            source_format: source.sample_format,
            format,
            layout,
            converter,
            fifo: SampleFifo::new(format, source.channels),
            frame_size,
        })
    }

    pub fn encode(
        &mut self,
        block: &RawAudioFrame,
        timeline: &mut Timeline,
        output: &mut AvOutput,
    ) -> anyhow::Result<()> {
        if block.format() != self.source_format {
            anyhow::bail!(
                "audio block is {:?}, source is {:?}",
                block.format(),
                self.source_format
            );
        }
        timeline.audio_start(block.pts(), block.time_base(), self.sample_rate);
        match self.converter.as_mut() {
            Some(converter) => {
                let converted = converter.convert(block)?;
                self.fifo.push(&converted)?;
            }
            None => self.fifo.push(block.as_audio())?,
        }
        let chunk = if self.frame_size > 0 {
            self.frame_size
        } else {
            self.fifo.len()
        };
        while chunk > 0 && self.fifo.len() >= chunk {
            self.send_chunk(chunk, timeline, output)?;
        }
        Ok(())
    }

    /// Sends what is left in the fifo (padded to a full frame) and flushes.
    pub fn finish(&mut self, timeline: &mut Timeline, output: &mut AvOutput) -> anyhow::Result<()> {
        if !self.fifo.is_empty() {
            let chunk = if self.frame_size > 0 {
                self.frame_size
            } else {
                self.fifo.len()
            };
            self.send_chunk(chunk, timeline, output)?;
        }
        self.inner.send_eof()?;
        self.drain(output)?;
        Ok(())
    }

    fn send_chunk(
        &mut self,
        samples: usize,
        timeline: &mut Timeline,
        output: &mut AvOutput,
    ) -> anyhow::Result<()> {
        let mut frame = alloc_audio(self.format, samples, &self.layout, self.sample_rate)?;
        let pts = timeline.audio_pts();
        self.fifo.pop_into(&mut frame, samples);
        frame.set_pts(Some(pts));
        timeline.advance_audio(samples);
        self.inner.send_frame(&frame)?;
        self.drain(output)?;
        Ok(())
    }

    fn drain(&mut self, output: &mut AvOutput) -> anyhow::Result<usize> {
        let inner = &mut self.inner;
        drain_packets(
            &mut |packet| inner.receive_packet(packet),
            output,
            self.stream_index,
            self.encoder_time_base,
        )
    }
}

/// Allocates an audio frame for `samples` samples with its own copy of `layout`.
fn alloc_audio(
    format: Sample,
    samples: usize,
    layout: &SourceLayout,
    rate: u32,
) -> anyhow::Result<ffmpeg_next::frame::Audio> {
    let mut frame = ffmpeg_next::frame::Audio::empty();
    unsafe {
        let ptr = frame.as_mut_ptr();
        (*ptr).format = ffi::AVSampleFormat::from(format) as i32;
        (*ptr).nb_samples = samples as i32;
        (*ptr).sample_rate = rate as i32;
        let ret = ffi::av_channel_layout_copy(&mut (*ptr).ch_layout, layout.as_raw());
        if ret < 0 {
            anyhow::bail!("copy channel layout: {}", ffmpeg_next::Error::from(ret));
        }
        let ret = ffi::av_frame_get_buffer(ptr, 0);
        if ret < 0 {
            anyhow::bail!("allocate audio frame: {}", ffmpeg_next::Error::from(ret));
        }
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use ffmpeg_next::ChannelLayout;
    use ffmpeg_next::format::sample::Type;

    use super::*;
    use crate::test_media;

    fn audio_spec(path: &std::path::Path, codec: &str) -> RenditionSpec {
        RenditionSpec::new(path, 0, 0, "mp4").with_audio(codec, 96_000)
    }

    #[test]
    fn test_unsupported_sample_format_is_converted() -> anyhow::Result<()> {
        crate::init(log::LevelFilter::Warn)?;
        if find_encoder("aac").is_err() {
            eprintln!("skip: aac encoder not available");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("s16.m4a");
        let mut output = AvOutput::new(&path, "mp4")?;
        let source = test_media::stereo(Sample::I16(Type::Packed));

        let mut encoder = AudioEncoder::open(&mut output, &audio_spec(&path, "aac"), &source)?;
        assert!(encoder.converter.is_some());
        assert_ne!(encoder.format, source.sample_format);
        assert_eq!(encoder.layout, source.layout);

        output.write_header()?;
        let mut timeline = Timeline::new();
        for index in 0..10 {
            encoder.encode(&test_media::s16_block(index), &mut timeline, &mut output)?;
        }
        encoder.finish(&mut timeline, &mut output)?;
        output.finish()?;
        assert!(encoder.fifo.is_empty());

        let info = crate::metadata::probe(&path)?;
        let audio = info.audio().ok_or(anyhow::anyhow!("no audio stream"))?;
        assert_eq!(audio.channels, Some(2));
        assert_eq!(audio.sample_rate, Some(test_media::SAMPLE_RATE));
        Ok(())
    }

    #[test]
    fn test_block_in_other_format_is_rejected() -> anyhow::Result<()> {
        crate::init(log::LevelFilter::Warn)?;
        if find_encoder("aac").is_err() {
            eprintln!("skip: aac encoder not available");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mixed.m4a");
        let mut output = AvOutput::new(&path, "mp4")?;
        let source = test_media::stereo(Sample::I16(Type::Packed));
        let mut encoder = AudioEncoder::open(&mut output, &audio_spec(&path, "aac"), &source)?;
        output.write_header()?;

        let mut timeline = Timeline::new();
        let err = encoder.encode(&test_media::tone_block(0), &mut timeline, &mut output);
        assert!(err.is_err());
        Ok(())
    }

    #[test]
    fn test_source_channel_layout_is_kept() -> anyhow::Result<()> {
        crate::init(log::LevelFilter::Warn)?;
        if find_encoder("pcm_s16le").is_err() {
            eprintln!("skip: pcm_s16le encoder not available");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("quad.mov");
        let mut output = AvOutput::new(&path, "mov")?;
        let quad = SourceLayout::from_mask(ChannelLayout::QUAD).ok_or(anyhow::anyhow!("quad layout"))?;
        // the default four-channel layout is 4.0, not quad
        assert_ne!(quad, SourceLayout::default_for(4));
        let source = AudioDescriptor::new(48_000, Sample::I16(Type::Packed), quad.clone());
        let spec = RenditionSpec::new(&path, 0, 0, "mov").with_audio("pcm_s16le", 0);

        let encoder = AudioEncoder::open(&mut output, &spec, &source)?;
        let opened = SourceLayout::copy_from(unsafe { &(*encoder.inner.as_ptr()).ch_layout });
        assert_eq!(opened, quad);
        assert!(encoder.converter.is_none());
        Ok(())
    }

    #[test]
    fn test_unspecified_layout_gets_the_default() -> anyhow::Result<()> {
        crate::init(log::LevelFilter::Warn)?;
        if find_encoder("pcm_s16le").is_err() {
            eprintln!("skip: pcm_s16le encoder not available");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("unspec.mov");
        let mut output = AvOutput::new(&path, "mov")?;
        let unspec = unsafe {
            let mut raw: ffi::AVChannelLayout = std::mem::zeroed();
            raw.order = ffi::AVChannelOrder::AV_CHANNEL_ORDER_UNSPEC;
            raw.nb_channels = 2;
            SourceLayout::copy_from(&raw)
        };
        assert!(!unspec.is_specified());
        let source = AudioDescriptor::new(48_000, Sample::I16(Type::Packed), unspec);
        let spec = RenditionSpec::new(&path, 0, 0, "mov").with_audio("pcm_s16le", 0);

        let encoder = AudioEncoder::open(&mut output, &spec, &source)?;
        assert_eq!(encoder.layout, SourceLayout::default_for(2));
        Ok(())
    }

    #[test]
    fn test_too_many_planar_channels_are_rejected() -> anyhow::Result<()> {
        crate::init(log::LevelFilter::Warn)?;
        if find_encoder("aac").is_err() {
            eprintln!("skip: aac encoder not available");
            return Ok(());
        }
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wide.m4a");
        let mut output = AvOutput::new(&path, "mp4")?;
        let channels = MAX_PLANES as u16 + 2;
        let source = AudioDescriptor::new(48_000, Sample::F32(Type::Planar), SourceLayout::default_for(channels));

        let err = AudioEncoder::open(&mut output, &audio_spec(&path, "aac"), &source).err();
        let reason = format!("{:#}", err.ok_or(anyhow::anyhow!("encoder opened"))?);
        assert!(reason.contains("planes"), "{}", reason);
        Ok(())
    }
}
