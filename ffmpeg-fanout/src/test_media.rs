//! Short synthetic clips written through the crate's own encoders, for tests
//! that need a real file on disk.

use std::path::Path;

use ffmpeg_next::format::{Pixel, Sample, sample::Type};
use ffmpeg_next::{ChannelLayout, Rational};

use crate::encoder::AudioEncoder;
use crate::frame::{RawAudioFrame, RawVideoFrame};
use crate::metadata::{AudioDescriptor, SourceDescriptor, SourceLayout};
use crate::output::AvOutput;
use crate::sink::{FileRenditionSink, RenditionSink};
use crate::timeline::Timeline;
use crate::RenditionSpec;

pub const FPS: i32 = 25;
pub const SAMPLE_RATE: u32 = 44_100;
pub const BLOCK: usize = 1024;
pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 180;

pub fn encoders_available() -> bool {
    ["mpeg4", "aac"]
        .iter()
        .all(|name| ffmpeg_next::encoder::find_by_name(name).is_some())
}

pub fn stereo(format: Sample) -> AudioDescriptor {
    AudioDescriptor::new(SAMPLE_RATE, format, SourceLayout::default_for(2))
}

pub fn pattern_frame(index: i64, width: u32, height: u32) -> RawVideoFrame {
    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, width, height);
    for plane in 0..frame.planes() {
        let stride = frame.stride(plane);
        for (i, b) in frame.data_mut(plane).iter_mut().enumerate() {
            *b = ((i % stride) as i64 + index * 3) as u8;
        }
    }
    frame.set_pts(Some(index));
    RawVideoFrame::new(frame, Rational(1, FPS))
}

fn sine(index: i64, i: usize) -> f32 {
    let t = (index as usize * BLOCK + i) as f32 / SAMPLE_RATE as f32;
    (t * 440.0 * std::f32::consts::TAU).sin() * 0.2
}

fn stereo_block(format: Sample, index: i64) -> ffmpeg_next::frame::Audio {
    let mut frame = ffmpeg_next::frame::Audio::new(format, BLOCK, ChannelLayout::STEREO);
    unsafe {
        let ptr = frame.as_mut_ptr();
        ffmpeg_next::ffi::av_channel_layout_uninit(&mut (*ptr).ch_layout);
        ffmpeg_next::ffi::av_channel_layout_default(&mut (*ptr).ch_layout, 2);
    }
    frame.set_rate(SAMPLE_RATE);
    frame.set_pts(Some(index * BLOCK as i64));
    frame
}

/// 440 Hz tone, float planar stereo.
pub fn tone_block(index: i64) -> RawAudioFrame {
    let mut frame = stereo_block(Sample::F32(Type::Planar), index);
    for plane in 0..2 {
        let data = frame.data_mut(plane);
        for (i, chunk) in data.chunks_exact_mut(4).take(BLOCK).enumerate() {
            chunk.copy_from_slice(&sine(index, i).to_ne_bytes());
        }
    }
    RawAudioFrame::new(frame, Rational(1, SAMPLE_RATE as i32))
}

/// The same tone as interleaved signed 16-bit stereo.
pub fn s16_block(index: i64) -> RawAudioFrame {
    let mut frame = stereo_block(Sample::I16(Type::Packed), index);
    let data = frame.data_mut(0);
    for (i, pair) in data.chunks_exact_mut(4).take(BLOCK).enumerate() {
        let sample = (sine(index, i) * i16::MAX as f32) as i16;
        pair[..2].copy_from_slice(&sample.to_ne_bytes());
        pair[2..].copy_from_slice(&sample.to_ne_bytes());
    }
    RawAudioFrame::new(frame, Rational(1, SAMPLE_RATE as i32))
}

/// Writes `frames` video frames at 25 fps through a file sink built from
/// `spec`, with audio blocks from `block` interleaved up to each frame's end.
pub fn write_clip(
    spec: RenditionSpec,
    frames: i64,
    audio: AudioDescriptor,
    block: fn(i64) -> RawAudioFrame,
) -> anyhow::Result<()> {
    let descriptor = SourceDescriptor::new(spec.width, spec.height, Rational(FPS, 1), Some(audio), "synthetic");
    let (width, height) = (spec.width, spec.height);
    let mut sink = FileRenditionSink::new(spec, descriptor);
    sink.start()?;

    let mut written = 0i64;
    for index in 0..frames {
        sink.consume_video(pattern_frame(index, width, height))?;
        let frame_end = (index + 1) * SAMPLE_RATE as i64 / FPS as i64;
        while written * (BLOCK as i64) < frame_end {
            sink.consume_audio(SAMPLE_RATE, 2, &block(written))?;
            written += 1;
        }
    }
    sink.stop()?;
    sink.release();
    Ok(())
}

/// MPEG-4 video with B-frames plus AAC audio, 320x180.
pub fn write_source(path: &Path, frames: i64) -> anyhow::Result<()> {
    let mut spec = RenditionSpec::new(path, WIDTH, HEIGHT, "mp4")
        .with_video("mpeg4", 800_000)
        .with_audio("aac", 96_000);
    // reordered frames keep some pictures inside the decoder until it is drained
    spec.video_options.insert("bf".to_string(), "2".to_string());
    write_clip(spec, frames, stereo(Sample::F32(Type::Planar)), tone_block)
}

/// An AAC track in an mp4 container with no video stream at all.
pub fn write_audio_only(path: &Path, blocks: i64) -> anyhow::Result<()> {
    let spec = RenditionSpec::new(path, 0, 0, "mp4").with_audio("aac", 96_000);
    let mut output = AvOutput::new(path, "mp4")?;
    let mut encoder = AudioEncoder::open(&mut output, &spec, &stereo(Sample::F32(Type::Planar)))?;
    output.write_header()?;
    let mut timeline = Timeline::new();
    for index in 0..blocks {
        encoder.encode(&tone_block(index), &mut timeline, &mut output)?;
    }
    encoder.finish(&mut timeline, &mut output)?;
    output.finish()
}
