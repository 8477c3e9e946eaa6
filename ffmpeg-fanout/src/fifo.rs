//! Sample FIFO that regroups audio blocks into the fixed frame size an
//! encoder expects (1024 for AAC). Blocks must already be in the encoder's
//! sample format.

use ffmpeg_next::format::Sample;
use ffmpeg_next::frame::Audio;

/// Planes reachable through `AVFrame::data`. Planar audio with more channels
/// than this is not supported.
pub const MAX_PLANES: usize = ffmpeg_next::ffi::AV_NUM_DATA_POINTERS as usize;

pub struct SampleFifo {
    format: Sample,
    channels: u16,
    planes: Vec<Vec<u8>>,
    samples: usize,
}

impl SampleFifo {
    pub fn new(format: Sample, channels: u16) -> Self {
        let plane_count = if format.is_planar() {
            channels.max(1) as usize
        } else {
            1
        };
        Self {
            format,
            channels,
            planes: vec![Vec::new(); plane_count],
            samples: 0,
        }
    }

    /// Samples buffered per channel.
    pub fn len(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    fn bytes_for(&self, samples: usize) -> usize {
        let per_sample = self.format.bytes();
        if self.format.is_planar() {
            samples * per_sample
        } else {
            samples * per_sample * self.channels as usize
        }
    }

    pub fn push(&mut self, frame: &Audio) -> anyhow::Result<()> {
        if frame.format() != self.format {
            anyhow::bail!(
                "sample format {:?} does not match fifo format {:?}",
                frame.format(),
                self.format
            );
        }
        if self.planes.len() > MAX_PLANES {
            anyhow::bail!("{} planes exceed the {} a frame can hold", self.planes.len(), MAX_PLANES);
        }
        let bytes = self.bytes_for(frame.samples());
        for (index, plane) in self.planes.iter_mut().enumerate() {
            let data = frame.data(index);
            if data.len() < bytes {
                anyhow::bail!("plane {} holds {} bytes, expected {}", index, data.len(), bytes);
            }
            plane.extend_from_slice(&data[..bytes]);
        }
        self.samples += frame.samples();
        Ok(())
    }

    /// Removes up to `samples` samples and writes them into `frame`, which
    /// must already be allocated for at least `samples` samples. A short
    /// read is padded with silence. Returns how many real samples were used.
    pub fn pop_into(&mut self, frame: &mut Audio, samples: usize) -> usize {
        let taken = samples.min(self.samples);
        let taken_bytes = self.bytes_for(taken);
        let total_bytes = self.bytes_for(samples);
        let silence = silence_byte(self.format);
        for (index, plane) in self.planes.iter_mut().enumerate() {
            let dst = &mut frame.data_mut(index)[..total_bytes];
            dst[..taken_bytes].copy_from_slice(&plane[..taken_bytes]);
            dst[taken_bytes..].fill(silence);
            plane.drain(..taken_bytes);
        }
        self.samples -= taken;
        taken
    }
}

/// Unsigned 8-bit audio is centred on 0x80; every other format on zero.
fn silence_byte(format: Sample) -> u8 {
    match format {
        Sample::U8(_) => 0x80,
        _ => 0,
    }
}
