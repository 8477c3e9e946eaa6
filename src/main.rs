use anyhow::Context as _;
use clap::Parser;
use ffmpeg_fanout::{FileOpener, FileSinkFactory, Pipeline, RenditionOutcome};

mod config;

use config::{Cli, Command, RunArgs};

fn init_logging(level: log::LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .filter_module("ffmpeg_fanout", level)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = cli.log_level();
    init_logging(level);
    ffmpeg_fanout::init(level)?;

    match cli.command {
        Command::Probe { input } => {
            let info = ffmpeg_fanout::metadata::probe(&input)
                .with_context(|| format!("probe {}", input.display()))?;
            print!("{}", info);
            Ok(())
        }
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let renditions = args.renditions()?;
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("create output dir {}", args.output_dir.display()))?;

    let mut pipeline = Pipeline::new(
        FileOpener,
        FileSinkFactory::new(&args.output_dir),
        renditions,
    )
    .with_options(args.options());
    let cancel = pipeline.cancel_token();
    let input = args.input.clone();
    let mut task = tokio::task::spawn_blocking(move || pipeline.run(&input));

    let result = tokio::select! {
        joined = &mut task => joined?,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("interrupted, finishing open renditions");
            cancel.cancel();
            task.await?
        }
    };
    let report = result?;

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_vec_pretty(&report)?)
            .with_context(|| format!("write report {}", path.display()))?;
    }

    for rendition in &report.renditions {
        match &rendition.outcome {
            RenditionOutcome::Success => {
                println!("{}", rendition.spec.output_path.display())
            }
            RenditionOutcome::Failure { reason } => {
                eprintln!("failed {}: {}", rendition.spec.name(), reason)
            }
        }
    }

    if let Some(error) = &report.source_error {
        anyhow::bail!("input failed after {} frames: {}", report.total_frames_processed, error);
    }
    if report.cancelled {
        anyhow::bail!("cancelled after {} frames", report.total_frames_processed);
    }
    let failed = report.failed().count();
    if failed > 0 {
        anyhow::bail!("{} of {} renditions failed", failed, report.renditions.len());
    }
    Ok(())
}
