use bytes::Bytes;
use ffmpeg_next::Rational;

/// One item produced by a frame source. Video and audio arrive interleaved
/// in container order.
#[derive(Clone)]
pub enum RawFrame {
    Video(RawVideoFrame),
    Audio(RawAudioFrame),
}

/// A block of decoded samples together with the time base of its pts.
#[derive(Clone)]
pub struct RawAudioFrame {
    frame: ffmpeg_next::frame::Audio,
    time_base: Rational,
}

impl RawAudioFrame {
    pub fn new(frame: ffmpeg_next::frame::Audio, time_base: Rational) -> Self {
        Self { frame, time_base }
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn format(&self) -> ffmpeg_next::format::Sample {
        self.frame.format()
    }

    pub fn samples(&self) -> usize {
        self.frame.samples()
    }

    pub fn rate(&self) -> u32 {
        self.frame.rate()
    }

    pub fn channels(&self) -> u16 {
        unsafe { (*self.frame.as_ptr()).ch_layout.nb_channels.max(0) as u16 }
    }

    pub fn as_audio(&self) -> &ffmpeg_next::frame::Audio {
        &self.frame
    }
}

/// A decoded picture together with the time base of its pts.
///
/// `Clone` is a deep copy: the pixel planes are duplicated, never shared.
#[derive(Clone)]
pub struct RawVideoFrame {
    frame: ffmpeg_next::frame::Video,
    time_base: Rational,
}

impl RawVideoFrame {
    pub fn new(frame: ffmpeg_next::frame::Video, time_base: Rational) -> Self {
        Self { frame, time_base }
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> ffmpeg_next::format::Pixel {
        self.frame.format()
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Video {
        &mut self.frame
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }

    pub fn planes(&self) -> usize {
        self.frame.planes()
    }

    /// Copies the visible rows of one plane, dropping line padding, so two
    /// frames with different strides can be compared byte for byte.
    pub fn plane(&self, index: usize) -> Bytes {
        let stride = self.frame.stride(index);
        let row_bytes = self.frame.plane_width(index) as usize
            * bytes_per_pixel(self.frame.format(), index);
        let rows = self.frame.plane_height(index) as usize;
        let data = self.frame.data(index);
        let mut out = Vec::with_capacity(row_bytes * rows);
        for row in 0..rows {
            let start = row * stride;
            out.extend_from_slice(&data[start..start + row_bytes]);
        }
        Bytes::from(out)
    }
}

/// Bytes per pixel within one plane for the formats the pipeline handles.
/// Planar YUV and GRAY use one byte per sample; packed RGB formats use one
/// sample per channel.
fn bytes_per_pixel(format: ffmpeg_next::format::Pixel, plane: usize) -> usize {
    use ffmpeg_next::format::Pixel;
    match format {
        Pixel::RGB24 | Pixel::BGR24 => 3,
        Pixel::RGBA | Pixel::BGRA | Pixel::ARGB | Pixel::ABGR => 4,
        Pixel::NV12 | Pixel::NV21 if plane == 1 => 2,
        Pixel::YUYV422 | Pixel::UYVY422 => 2,
        _ => 1,
    }
}
