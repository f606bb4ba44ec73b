//! One request, start to finish: validate, probe, configure, transcode.

use crate::encoder::{configure_encoder, EncoderSettings, OutputPolicy};
use crate::error::{ClipError, ClipResult};
use crate::pipeline::{FrameBudget, FramePipeline, PipelineClock, PipelineSummary};
use crate::probe::probe_source;
use crate::progress::{ProgressSink, ProgressState};
use crate::request::{unique_output_path, ClipRequest, JobId};
use crate::scale::ScalingContext;
use log::{error, info};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// What a finished job produced.
#[derive(Clone, Debug, Serialize)]
pub struct JobReport {
    pub job: JobId,
    pub output_path: PathBuf,
    pub source_bit_rate: Option<i64>,
    pub encoder: EncoderSettings,
    pub pipeline: PipelineSummary,
    #[serde(skip)]
    pub elapsed: Duration,
}

pub struct TranscodeJob<'p> {
    request: ClipRequest,
    policy: &'p OutputPolicy,
}

impl<'p> TranscodeJob<'p> {
    pub fn new(request: ClipRequest, policy: &'p OutputPolicy) -> Self {
        Self { request, policy }
    }

    pub fn request(&self) -> &ClipRequest {
        &self.request
    }

    /// Runs the job and always emits exactly one terminal progress event.
    /// Partial output is left on disk when a stage fails.
    pub fn run(self, sink: ProgressSink) -> ClipResult<JobReport> {
        let mut progress = ProgressState::new(self.request.id, sink);
        let started = Instant::now();
        info!(
            "Job {} accepted: '{}' [{} ms, {} ms) -> '{}'",
            self.request.id.short(),
            self.request.source_path.display(),
            self.request.begin_offset_ms,
            self.request.end_offset_ms,
            self.request.output_directory.display()
        );

        match self.execute(&mut progress) {
            Ok(mut report) => {
                report.elapsed = started.elapsed();
                info!(
                    "Job {} finished in {:.2}s: {} frames -> '{}'",
                    self.request.id.short(),
                    report.elapsed.as_secs_f64(),
                    report.pipeline.frames_written,
                    report.output_path.display()
                );
                progress.complete();
                Ok(report)
            }
            Err(err) => {
                error!(
                    "Job {} failed ({}): {}",
                    self.request.id.short(),
                    err.kind(),
                    err
                );
                progress.fail();
                Err(err)
            }
        }
    }

    // Both handles live only inside this call, so they are released before
    // the caller emits the terminal event.
    fn execute(&self, progress: &mut ProgressState) -> ClipResult<JobReport> {
        self.request.validate()?;

        let mut source = probe_source(&self.request.source_path)?;

        fs::create_dir_all(&self.request.output_directory).map_err(|e| ClipError::Io {
            path: self.request.output_directory.clone(),
            source: e,
        })?;
        let output_path = unique_output_path(&self.request.output_directory, self.policy.extension);
        let configured = configure_encoder(&source, &output_path, self.policy)?;
        let mut encoder = configured.handle;

        let scaler = ScalingContext::new(
            (source.width, source.height, source.pix_fmt),
            (
                encoder.codec().width,
                encoder.codec().height,
                encoder.codec().pix_fmt,
            ),
        )?;
        let clock = PipelineClock::new(source.frame_rate, source.handle.time_base());
        let budget = FrameBudget::for_range(self.request.range_ms(), source.frame_rate);
        info!(
            "Job {}: {} frames to transcode at {}/{} fps",
            self.request.id.short(),
            budget.total(),
            source.frame_rate.num,
            source.frame_rate.den
        );

        let summary = FramePipeline::new(
            &mut source.handle,
            &mut encoder,
            scaler,
            clock,
            budget,
            progress,
        )
        .run(self.request.begin_offset_ms)?;

        Ok(JobReport {
            job: self.request.id,
            output_path,
            source_bit_rate: source.bit_rate,
            encoder: configured.settings,
            pipeline: summary,
            elapsed: Duration::ZERO,
        })
    }
}

/// Convenience wrapper for running a single request with the given policy.
pub fn run_clip(request: ClipRequest, policy: &OutputPolicy, sink: ProgressSink) -> ClipResult<JobReport> {
    TranscodeJob::new(request, policy).run(sink)
}
