use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ffmpeg_fanout::{EncodeFailurePolicy, PipelineOptions, RenditionSpec, StartupPolicy};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "fanout", version, about = "Decode a video once and encode it into several renditions")]
pub struct Cli {
    /// More logging; repeat for trace output.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Transcode one input into every rendition of a ladder.
    Run(RunArgs),
    /// Print container and stream information.
    Probe { input: PathBuf },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    pub input: PathBuf,

    /// Created when missing. Relative rendition paths are placed here.
    pub output_dir: PathBuf,

    /// JSON ladder; the built-in 1080p/720p/360p ladder when omitted.
    #[arg(long)]
    pub ladder: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Startup::Abort)]
    pub startup: Startup,

    #[arg(long, value_enum, default_value_t = OnEncodeFailure::KeepFeeding)]
    pub on_encode_failure: OnEncodeFailure,

    /// Write the run report as JSON.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl RunArgs {
    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            startup: match self.startup {
                Startup::Abort => StartupPolicy::Abort,
                Startup::SkipFailed => StartupPolicy::SkipFailed,
            },
            on_encode_failure: match self.on_encode_failure {
                OnEncodeFailure::KeepFeeding => EncodeFailurePolicy::KeepFeeding,
                OnEncodeFailure::Disable => EncodeFailurePolicy::Disable,
            },
        }
    }

    pub fn renditions(&self) -> anyhow::Result<Vec<RenditionSpec>> {
        match &self.ladder {
            Some(path) => load_ladder(path),
            None => Ok(ffmpeg_fanout::default_ladder()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Startup {
    Abort,
    SkipFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnEncodeFailure {
    KeepFeeding,
    Disable,
}

/// A ladder file is either a bare list or `{"renditions": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum LadderFile {
    List(Vec<RenditionSpec>),
    Wrapped { renditions: Vec<RenditionSpec> },
}

pub fn parse_ladder(json: &str) -> anyhow::Result<Vec<RenditionSpec>> {
    let renditions = match serde_json::from_str(json)? {
        LadderFile::List(renditions) => renditions,
        LadderFile::Wrapped { renditions } => renditions,
    };
    if renditions.is_empty() {
        anyhow::bail!("ladder has no renditions");
    }
    Ok(renditions)
}

pub fn load_ladder(path: &Path) -> anyhow::Result<Vec<RenditionSpec>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read ladder {}", path.display()))?;
    parse_ladder(&json).with_context(|| format!("parse ladder {}", path.display()))
}
