//! Source description taken once at open time, and ffprobe-like inspection.

use std::ffi::{CStr, c_char};
use std::fmt;
use std::path::Path;

use ffmpeg_next::{Rational, ffi};

use crate::stream::AvStream;

/// Frame rate used when the container reports none (or nonsense).
pub const DEFAULT_FRAME_RATE: Rational = Rational(25, 1);

/// Returns `rate` when it is a positive rational, `DEFAULT_FRAME_RATE` otherwise.
pub fn normalize_frame_rate(rate: Rational) -> Rational {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        rate
    } else {
        DEFAULT_FRAME_RATE
    }
}

/// Owned copy of an FFmpeg channel layout, including custom channel maps.
pub struct SourceLayout(ffi::AVChannelLayout);

// The copy owns its custom map, if any, and is never mutated after construction.
unsafe impl Send for SourceLayout {}
unsafe impl Sync for SourceLayout {}

impl SourceLayout {
    /// Copies `raw`. Falls back to the default layout for its channel count
    /// when the copy cannot be allocated.
    pub fn copy_from(raw: &ffi::AVChannelLayout) -> Self {
        unsafe {
            let mut layout: ffi::AVChannelLayout = std::mem::zeroed();
            if ffi::av_channel_layout_copy(&mut layout, raw) < 0 {
                ffi::av_channel_layout_default(&mut layout, raw.nb_channels);
            }
            Self(layout)
        }
    }

    /// FFmpeg's default layout for `channels` (stereo for 2, 5.1 for 6, ...).
    pub fn default_for(channels: u16) -> Self {
        unsafe {
            let mut layout: ffi::AVChannelLayout = std::mem::zeroed();
            ffi::av_channel_layout_default(&mut layout, channels as i32);
            Self(layout)
        }
    }

    /// Native-order layout for a channel mask; `None` for an empty mask.
    pub fn from_mask(mask: ffmpeg_next::ChannelLayout) -> Option<Self> {
        unsafe {
            let mut layout: ffi::AVChannelLayout = std::mem::zeroed();
            if ffi::av_channel_layout_from_mask(&mut layout, mask.bits()) < 0 {
                return None;
            }
            Some(Self(layout))
        }
    }

    pub fn channels(&self) -> u16 {
        self.0.nb_channels.max(0) as u16
    }

    /// False when only the channel count is known.
    pub fn is_specified(&self) -> bool {
        self.0.order != ffi::AVChannelOrder::AV_CHANNEL_ORDER_UNSPEC
    }

    /// The layout as a channel mask, when it is in native order.
    pub fn mask(&self) -> Option<ffmpeg_next::ChannelLayout> {
        if self.0.order == ffi::AVChannelOrder::AV_CHANNEL_ORDER_NATIVE {
            Some(ffmpeg_next::ChannelLayout::from_bits_truncate(unsafe { self.0.u.mask }))
        } else {
            None
        }
    }

    pub fn as_raw(&self) -> &ffi::AVChannelLayout {
        &self.0
    }
}

impl Clone for SourceLayout {
    fn clone(&self) -> Self {
        Self::copy_from(&self.0)
    }
}

impl Drop for SourceLayout {
    fn drop(&mut self) {
        unsafe { ffi::av_channel_layout_uninit(&mut self.0) }
    }
}

impl PartialEq for SourceLayout {
    fn eq(&self, other: &Self) -> bool {
        unsafe { ffi::av_channel_layout_compare(&self.0, &other.0) == 0 }
    }
}

impl fmt::Display for SourceLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0 as c_char; 64];
        let ret = unsafe { ffi::av_channel_layout_describe(&self.0, buf.as_mut_ptr(), buf.len()) };
        if ret < 0 {
            return write!(f, "{} channels", self.channels());
        }
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        f.write_str(&name.to_string_lossy())
    }
}

impl fmt::Debug for SourceLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceLayout({})", self)
    }
}

/// Decoded audio of the source. Every rendition keeps its rate and channel
/// layout; only the sample format may be converted for the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: ffmpeg_next::format::Sample,
    pub layout: SourceLayout,
}

impl AudioDescriptor {
    pub fn new(sample_rate: u32, sample_format: ffmpeg_next::format::Sample, layout: SourceLayout) -> Self {
        Self {
            sample_rate,
            channels: layout.channels(),
            sample_format,
            layout,
        }
    }
}

/// Immutable snapshot of the input, shared read-only with every rendition.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub width: u32,
    pub height: u32,
    frame_rate: Rational,
    pub audio: Option<AudioDescriptor>,
    pub format_name: String,
}

impl SourceDescriptor {
    pub fn new(
        width: u32,
        height: u32,
        frame_rate: Rational,
        audio: Option<AudioDescriptor>,
        format_name: impl Into<String>,
    ) -> Self {
        Self {
            width,
            height,
            frame_rate: normalize_frame_rate(frame_rate),
            audio,
            format_name: format_name.into(),
        }
    }

    /// Exact frame rate, never zero or negative.
    pub fn frame_rate(&self) -> Rational {
        self.frame_rate
    }

    pub fn fps(&self) -> f64 {
        f64::from(self.frame_rate)
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "format={} size={}x{} fps={:.3}",
            self.format_name,
            self.width,
            self.height,
            self.fps()
        )?;
        match &self.audio {
            Some(audio) => write!(
                f,
                " audio={}Hz/{}/{:?}",
                audio.sample_rate, audio.layout, audio.sample_format
            ),
            None => write!(f, " audio=none"),
        }
    }
}

/// Format-level info (corresponds to ffprobe format).
#[derive(Debug, Clone)]
pub struct FormatInfo {
    /// Format name, e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: String,
    /// Duration in seconds; None if unknown (e.g. raw h264).
    pub duration_sec: Option<f64>,
    /// Total bitrate in bps; 0 if unknown.
    pub bit_rate: i64,
}

/// Per-stream info (corresponds to ffprobe stream).
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    /// "video" | "audio" | "subtitle" etc.
    pub codec_type: String,
    pub codec_name: String,
    /// e.g. "1/90000"
    pub time_base: String,
    /// e.g. "25/1"
    pub rate: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.codec_type == "video")
    }

    pub fn audio(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.codec_type == "audio")
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "format_name={}", self.format.format_name)?;
        match self.format.duration_sec {
            Some(d) => writeln!(f, "duration_sec={:.3}", d)?,
            None => writeln!(f, "duration_sec=N/A")?,
        }
        writeln!(f, "bit_rate={}", self.format.bit_rate)?;
        writeln!(f, "nb_streams={}", self.streams.len())?;
        writeln!(f, "[/FORMAT]")?;
        for s in &self.streams {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", s.index)?;
            writeln!(f, "codec_type={}", s.codec_type)?;
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(f, "time_base={}", s.time_base)?;
            writeln!(f, "rate={}", s.rate)?;
            if let (Some(w), Some(h)) = (s.width, s.height) {
                writeln!(f, "width={}", w)?;
                writeln!(f, "height={}", h)?;
            }
            if let (Some(sr), Some(c)) = (s.sample_rate, s.channels) {
                writeln!(f, "sample_rate={}", sr)?;
                writeln!(f, "channels={}", c)?;
            }
            writeln!(f, "[/STREAM]")?;
        }
        Ok(())
    }
}

/// Opens a file and returns media metadata (similar to ffprobe).
pub fn probe(path: &Path) -> anyhow::Result<MediaInfo> {
    let input = ffmpeg_next::format::input(&path)?;

    // duration is in 1/AV_TIME_BASE seconds
    let duration_sec = {
        let d = input.duration();
        if d == ffi::AV_NOPTS_VALUE as i64 || d <= 0 {
            None
        } else {
            Some(d as f64 / ffi::AV_TIME_BASE as f64)
        }
    };

    let streams = input
        .streams()
        .map(|stream| {
            let stream = AvStream::from(stream);
            let time_base = stream.time_base();
            let rate = stream.rate();
            let (width, height) = if stream.is_video() {
                (Some(stream.width()), Some(stream.height()))
            } else {
                (None, None)
            };
            let (sample_rate, channels) = if stream.is_audio() {
                (Some(stream.sample_rate()), Some(stream.channels()))
            } else {
                (None, None)
            };
            StreamInfo {
                index: stream.index(),
                codec_type: format!("{:?}", stream.parameters().medium()).to_lowercase(),
                codec_name: stream.codec_name(),
                time_base: format!("{}/{}", time_base.numerator(), time_base.denominator()),
                rate: format!("{}/{}", rate.numerator(), rate.denominator()),
                width,
                height,
                sample_rate,
                channels,
            }
        })
        .collect();

    Ok(MediaInfo {
        format: FormatInfo {
            format_name: input.format().name().to_string(),
            duration_sec,
            bit_rate: input.bit_rate(),
        },
        streams,
    })
}
