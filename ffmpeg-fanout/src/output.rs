use std::path::Path;

use ffmpeg_next::{Rational, codec::packet::Packet};

/// One output container. Streams are added while opening encoders, then the
/// header is written once; packets are interleaved by the muxer.
pub struct AvOutput {
    inner: ffmpeg_next::format::context::Output,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl AvOutput {
    pub fn new(path: &Path, format: &str) -> anyhow::Result<Self> {
        let output = ffmpeg_next::format::output_as(&path, format)?;
        Ok(Self {
            inner: output,
            have_written_header: false,
            have_written_trailer: false,
        })
    }

    /// Whether encoders must put codec headers in extradata for this container.
    pub fn global_header(&self) -> bool {
        self.inner
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER)
    }

    /// Adds a stream whose parameters come from an opened encoder and returns
    /// its index.
    pub fn add_stream<P: Into<ffmpeg_next::codec::Parameters>>(
        &mut self,
        codec: ffmpeg_next::Codec,
        parameters: P,
        time_base: Rational,
    ) -> anyhow::Result<usize> {
        if self.have_written_header {
            anyhow::bail!("cannot add a stream after the header was written");
        }
        let mut writer_stream = self.inner.add_stream(codec)?;
        writer_stream.set_parameters(parameters);
        writer_stream.set_time_base(time_base);
        Ok(writer_stream.index())
    }

    pub fn write_header(&mut self) -> anyhow::Result<()> {
        if !self.have_written_header {
            self.inner.write_header()?;
            self.have_written_header = true;
        }
        Ok(())
    }

    /// Writes one encoded packet; `time_base` is the encoder's time base and
    /// is rescaled to whatever the muxer chose for the stream.
    pub fn write_packet(
        &mut self,
        stream_index: usize,
        mut packet: Packet,
        time_base: Rational,
    ) -> anyhow::Result<()> {
        if !self.have_written_header {
            anyhow::bail!("header not written");
        }
        if self.have_written_trailer {
            anyhow::bail!("output already finished");
        }
        let out_time_base = self
            .inner
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or(anyhow::anyhow!("stream not found: {}", stream_index))?;
        packet.set_stream(stream_index);
        packet.set_position(-1);
        packet.rescale_ts(time_base, out_time_base);
        packet.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    pub fn finish(&mut self) -> anyhow::Result<()> {
        if self.have_written_header && !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }
}
