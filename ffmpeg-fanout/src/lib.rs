use std::path::Path;
use std::sync::OnceLock;

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod fifo;
pub mod frame;
pub mod input;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod rendition;
pub mod report;
pub mod scaler;
pub mod sink;
pub mod stream;
pub mod timeline;

pub use error::{Error, Result};
pub use input::{FileOpener, FrameSource, SourceOpener};
pub use pipeline::{EncodeFailurePolicy, Pipeline, PipelineOptions, StartupPolicy};
pub use rendition::{RenditionSpec, default_ladder};
pub use report::{RenditionOutcome, RenditionReport, RunReport};
pub use sink::{FileSinkFactory, RenditionSink, SinkFactory};

static INIT: OnceLock<std::result::Result<(), ffmpeg_next::Error>> = OnceLock::new();

/// Registers FFmpeg components and sets FFmpeg's own log level. Only the
/// first call does anything; later calls return the first outcome.
pub fn init(level: log::LevelFilter) -> anyhow::Result<()> {
    let result = INIT.get_or_init(|| {
        ffmpeg_next::init()?;
        ffmpeg_next::util::log::set_level(ffmpeg_log_level(level));
        Ok(())
    });
    match result {
        Ok(()) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("ffmpeg_next init: {}", e)),
    }
}

fn ffmpeg_log_level(level: log::LevelFilter) -> ffmpeg_next::util::log::Level {
    use ffmpeg_next::util::log::Level;
    match level {
        log::LevelFilter::Off => Level::Quiet,
        log::LevelFilter::Error => Level::Error,
        log::LevelFilter::Warn | log::LevelFilter::Info => Level::Warning,
        log::LevelFilter::Debug => Level::Info,
        log::LevelFilter::Trace => Level::Debug,
    }
}

/// Transcodes `input` into every rendition of `renditions` with the default
/// policies. Relative output paths land in `output_dir`.
pub fn run(input: &Path, output_dir: &Path, renditions: Vec<RenditionSpec>) -> Result<RunReport> {
    Pipeline::new(FileOpener, FileSinkFactory::new(output_dir), renditions).run(input)
}


#[cfg(test)]
mod test_media;
