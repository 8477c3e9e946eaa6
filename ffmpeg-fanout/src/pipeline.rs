//! Decode once, fan out to every rendition.
//!
//! A run opens the source, starts one sink per rendition, then pulls frames
//! in a single loop: each video frame is resized for and handed to every
//! sink in ladder order, each audio block is handed to every sink as is.
//! Sinks fail independently. On every exit path each started sink is stopped
//! and each sink is released exactly once.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    frame::{RawAudioFrame, RawFrame, RawVideoFrame},
    input::{FrameSource, SourceOpener},
    metadata::SourceDescriptor,
    rendition::RenditionSpec,
    report::{RenditionOutcome, RenditionReport, RunReport},
    scaler::{FrameTransform, SwsTransform},
    sink::{RenditionSink, SinkFactory},
};

const PROGRESS_INTERVAL: u64 = 100;

/// What to do when a rendition fails to start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartupPolicy {
    /// Release everything and fail the run with the start error.
    #[default]
    Abort,
    /// Report the rendition as failed and run the others.
    SkipFailed,
}

/// What to do with a rendition after it rejects a frame or block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodeFailurePolicy {
    /// Keep offering it every later frame.
    #[default]
    KeepFeeding,
    /// Stop feeding it; it is still stopped and released at the end.
    Disable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    pub startup: StartupPolicy,
    pub on_encode_failure: EncodeFailurePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Configured,
    Running,
    Draining,
    Finished { success: bool },
}

impl PipelineState {
    fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Configured => "configured",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Finished { .. } => "finished",
        }
    }
}

/// Closes the source exactly once, on whichever path leaves the run.
struct SourceGuard<S: FrameSource> {
    inner: S,
    closed: bool,
}

impl<S: FrameSource> SourceGuard<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    fn descriptor(&self) -> &SourceDescriptor {
        self.inner.descriptor()
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        self.inner.next_frame()
    }

    fn rejected_packets(&self) -> u64 {
        self.inner.rejected_packets()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close();
        }
    }
}

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// One rendition's slot in the fan-out: its sink, its own resize state and
/// its counters. Releases the sink once, at the latest on drop.
struct Lane<S: RenditionSink> {
    sink: S,
    transform: SwsTransform,
    started: bool,
    disabled: bool,
    released: bool,
    video_frames: u64,
    audio_blocks: u64,
    failures: u64,
    first_failure: Option<String>,
}

impl<S: RenditionSink> Lane<S> {
    fn new(sink: S) -> Self {
        Self {
            sink,
            transform: SwsTransform::new(),
            started: false,
            disabled: false,
            released: false,
            video_frames: 0,
            audio_blocks: 0,
            failures: 0,
            first_failure: None,
        }
    }

    fn name(&self) -> String {
        self.sink.spec().name()
    }

    fn start(&mut self) -> Result<()> {
        match self.sink.start() {
            Ok(()) => {
                self.started = true;
                Ok(())
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn accepts_frames(&self) -> bool {
        self.started && !self.disabled && !self.released
    }

    fn feed_video(&mut self, frame: &RawVideoFrame, policy: EncodeFailurePolicy) {
        if !self.accepts_frames() {
            return;
        }
        let (width, height) = {
            let spec = self.sink.spec();
            (spec.width, spec.height)
        };
        let result = self
            .transform
            .resize(frame, width, height)
            .and_then(|scaled| self.sink.consume_video(scaled));
        match result {
            Ok(()) => self.video_frames += 1,
            Err(e) => self.fail(&e, policy),
        }
    }

    fn feed_audio(&mut self, block: &RawAudioFrame, policy: EncodeFailurePolicy) {
        if !self.accepts_frames() {
            return;
        }
        match self.sink.consume_audio(block.rate(), block.channels(), block) {
            Ok(()) => self.audio_blocks += 1,
            Err(e) => self.fail(&e, policy),
        }
    }

    fn fail(&mut self, err: &Error, policy: EncodeFailurePolicy) {
        self.record_failure(err);
        if policy == EncodeFailurePolicy::Disable && !self.disabled {
            self.disabled = true;
            log::warn!("rendition {} disabled after its first failure", self.name());
        }
    }

    fn record_failure(&mut self, err: &Error) {
        self.failures += 1;
        if self.first_failure.is_none() {
            log::warn!("rendition {} failed: {}", self.name(), err);
            self.first_failure = Some(err.to_string());
        } else {
            log::debug!("rendition {} failed again: {}", self.name(), err);
        }
    }

    /// Stops the sink if it was started, then releases it.
    fn drain(&mut self) {
        if self.started && !self.released {
            if let Err(e) = self.sink.stop() {
                log::error!("rendition {} stop failed: {}", self.name(), e);
                self.record_failure(&e);
            }
        }
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.sink.release();
        }
    }

    fn report(&self) -> RenditionReport {
        let outcome = match &self.first_failure {
            None => RenditionOutcome::Success,
            Some(reason) => RenditionOutcome::Failure {
                reason: reason.clone(),
            },
        };
        RenditionReport {
            spec: self.sink.spec().clone(),
            outcome,
            video_frames: self.video_frames,
            audio_blocks: self.audio_blocks,
            failures: self.failures,
            disabled: self.disabled,
        }
    }
}

impl<S: RenditionSink> Drop for Lane<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Orchestrates one run: one source, an ordered ladder of sinks.
pub struct Pipeline<O: SourceOpener, F: SinkFactory> {
    opener: O,
    factory: F,
    renditions: Vec<RenditionSpec>,
    options: PipelineOptions,
    cancel: CancellationToken,
    state: PipelineState,
}

impl<O: SourceOpener, F: SinkFactory> Pipeline<O, F> {
    pub fn new(opener: O, factory: F, renditions: Vec<RenditionSpec>) -> Self {
        Self {
            opener,
            factory,
            renditions,
            options: PipelineOptions::default(),
            cancel: CancellationToken::new(),
            state: PipelineState::Configured,
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Token that stops the run before the next frame is pulled. Sinks are
    /// still drained and the run reports itself as cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Runs the whole ladder over `input`.
    ///
    /// Fails without a report when the input cannot be opened (no sink is
    /// created) or, under [`StartupPolicy::Abort`], when a rendition cannot
    /// start. Everything after that, including decode errors, ends in a
    /// report.
    pub fn run(&mut self, input: &Path) -> Result<RunReport> {
        if self.state != PipelineState::Configured {
            return Err(Error::InvalidState {
                subject: "pipeline".to_string(),
                action: "run",
                state: self.state.as_str(),
            });
        }

        let source = match self.opener.open(input) {
            Ok(source) => source,
            Err(e) => {
                log::error!("open {} failed: {}", input.display(), e);
                self.state = PipelineState::Finished { success: false };
                return Err(e);
            }
        };
        let mut source = SourceGuard::new(source);
        let descriptor = source.descriptor().clone();
        log::info!("input {}: {}", input.display(), descriptor);

        let mut lanes = match self.start_lanes(&descriptor) {
            Ok(lanes) => lanes,
            Err(e) => {
                source.close();
                self.state = PipelineState::Finished { success: false };
                return Err(e);
            }
        };

        self.state = PipelineState::Running;
        let mut report = RunReport::default();
        if lanes.iter().any(|lane| lane.started) {
            self.pump(&mut source, &mut lanes, &mut report);
        } else {
            log::warn!("no rendition started, skipping decode");
        }

        self.state = PipelineState::Draining;
        for lane in lanes.iter_mut() {
            lane.drain();
        }
        report.rejected_packets = source.rejected_packets();
        source.close();
        if report.rejected_packets > 0 {
            log::warn!("{} corrupt packets skipped", report.rejected_packets);
        }

        report.renditions = lanes.iter().map(Lane::report).collect();
        for rendition in report.failed() {
            if let RenditionOutcome::Failure { reason } = &rendition.outcome {
                log::error!("rendition {} failed: {}", rendition.spec.name(), reason);
            }
        }
        let success = report.is_success();
        self.state = PipelineState::Finished { success };
        log::info!(
            "run finished: {} video frames, {} audio blocks, {}/{} renditions ok{}",
            report.total_frames_processed,
            report.audio_blocks_processed,
            report.renditions.len() - report.failed().count(),
            report.renditions.len(),
            if report.cancelled { ", cancelled" } else { "" }
        );
        Ok(report)
    }

    fn start_lanes(&self, descriptor: &SourceDescriptor) -> Result<Vec<Lane<F::Sink>>> {
        let mut lanes = Vec::with_capacity(self.renditions.len());
        for spec in &self.renditions {
            let mut lane = Lane::new(self.factory.create(spec, descriptor));
            if let Err(e) = lane.start() {
                match self.options.startup {
                    StartupPolicy::Abort => {
                        log::error!("aborting run, rendition {} did not start", spec.name());
                        // created lanes release on drop
                        return Err(e);
                    }
                    StartupPolicy::SkipFailed => lane.release(),
                }
            }
            lanes.push(lane);
        }
        Ok(lanes)
    }

    fn pump(
        &self,
        source: &mut SourceGuard<O::Source>,
        lanes: &mut [Lane<F::Sink>],
        report: &mut RunReport,
    ) {
        let policy = self.options.on_encode_failure;
        loop {
            if self.cancel.is_cancelled() {
                log::warn!("run cancelled after {} video frames", report.total_frames_processed);
                report.cancelled = true;
                return;
            }
            match source.next_frame() {
                Ok(Some(RawFrame::Video(frame))) => {
                    report.total_frames_processed += 1;
                    for lane in lanes.iter_mut() {
                        lane.feed_video(&frame, policy);
                    }
                    if report.total_frames_processed % PROGRESS_INTERVAL == 0 {
                        log::info!("processed {} video frames", report.total_frames_processed);
                    }
                }
                Ok(Some(RawFrame::Audio(block))) => {
                    report.audio_blocks_processed += 1;
                    for lane in lanes.iter_mut() {
                        lane.feed_audio(&block, policy);
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    log::error!("source failed: {}", e);
                    report.source_error = Some(e.to_string());
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
