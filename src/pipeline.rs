//! The per-frame state machine: read, decode, scale, encode, write, and the
//! seek and re-timestamping that let output start anywhere in the source.
//!
//! After a seek the source's own timestamps no longer line up with the frames
//! we keep, so every output packet is stamped from a local frame counter
//! instead (see [`PipelineClock`]).

use crate::av::av_error_to_string;
use crate::error::{ClipError, ClipResult};
use crate::handle::{DecodeHandle, EncodeHandle};
use crate::progress::ProgressState;
use crate::scale::ScalingContext;
use log::{debug, trace};
use rsmpeg::avcodec::AVPacket;
use rsmpeg::avutil::{ra, AVFrame};
use rsmpeg::error::RsmpegError;
use rsmpeg::ffi;
use serde::Serialize;
use strum_macros::Display;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
pub enum PipelineState {
    Idle,
    Seeking,
    Reading,
    Decoding,
    Scaling,
    Encoding,
    Writing,
    Flushing,
    Finalizing,
    Done,
    Errored,
}

/// Timestamps for one output packet, in the source stream's time base.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameStamp {
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
}

pub struct PipelineClock {
    frame_rate: ffi::AVRational,
    source_time_base: ffi::AVRational,
    decoded_frames: i64,
    submitted_frames: i64,
    frame_index: i64,
}

impl PipelineClock {
    pub fn new(frame_rate: ffi::AVRational, source_time_base: ffi::AVRational) -> Self {
        Self {
            frame_rate,
            source_time_base,
            decoded_frames: 0,
            submitted_frames: 0,
            frame_index: 0,
        }
    }

    /// Length of one frame in units of `1 / time_base.den`.
    pub fn frame_duration(&self) -> i64 {
        let fps = self.frame_rate;
        (self.source_time_base.den as i64 * fps.den as i64) / (fps.num as i64).max(1)
    }

    /// Stamps the next encoded frame and advances the synthetic index.
    pub fn next_stamp(&mut self) -> FrameStamp {
        let numerator = (self.source_time_base.num as i64).max(1);
        let frame_duration = self.frame_duration();
        let frame_time = self.frame_index * frame_duration;
        let pts = frame_time / numerator;
        self.frame_index += 1;
        FrameStamp {
            pts,
            dts: pts,
            duration: frame_duration / numerator,
        }
    }

    /// Number of frames stamped so far; also the index the next one gets.
    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    pub fn decoded_frames(&self) -> i64 {
        self.decoded_frames
    }

    pub fn source_time_base(&self) -> ffi::AVRational {
        self.source_time_base
    }

    fn note_decoded(&mut self) {
        self.decoded_frames += 1;
    }

    /// Presentation index handed to the encoder, in its 1/fps time base.
    fn next_submission(&mut self) -> i64 {
        let pts = self.submitted_frames;
        self.submitted_frames += 1;
        pts
    }
}

/// How many video packets the requested range spans.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameBudget {
    total: i64,
    consumed: i64,
}

impl FrameBudget {
    pub fn for_range(range_ms: i64, frame_rate: ffi::AVRational) -> Self {
        let den = 1000 * (frame_rate.den as i64).max(1);
        let total = (range_ms.max(0) * frame_rate.num as i64) / den;
        Self {
            total: total.max(1),
            consumed: 0,
        }
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn consumed(&self) -> i64 {
        self.consumed
    }

    pub fn exhausted(&self) -> bool {
        self.consumed >= self.total
    }

    fn consume(&mut self) {
        self.consumed += 1;
    }
}

/// Converts a millisecond offset into `time_base` units.
pub fn seek_target(begin_offset_ms: i64, time_base: ffi::AVRational) -> i64 {
    let micros = begin_offset_ms * ffi::AV_TIME_BASE as i64 / 1000;
    unsafe { ffi::av_rescale_q(micros, ra(1, ffi::AV_TIME_BASE as i32), time_base) }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PipelineSummary {
    /// Seek target in source time base units; `None` when the range started at 0.
    pub seek_target: Option<i64>,
    pub packets_read: u64,
    pub video_packets: i64,
    /// Packets decoded only to reach the first frame at or after the seek
    /// target; not charged to the budget.
    pub preroll_packets: i64,
    pub frames_decoded: i64,
    /// Decoded frames dropped for starting before the seek target.
    pub frames_skipped: i64,
    /// Source timestamp of the first frame that reached the encoder.
    pub first_source_pts: Option<i64>,
    pub frames_written: i64,
    pub total_frames: i64,
}

pub struct FramePipeline<'a> {
    decoder: &'a mut DecodeHandle,
    encoder: &'a mut EncodeHandle,
    scaler: ScalingContext,
    clock: PipelineClock,
    budget: FrameBudget,
    progress: &'a mut ProgressState,
    state: PipelineState,
    summary: PipelineSummary,
    /// Frames and packets stamped before this are pre-roll from a backward seek.
    skip_before: Option<i64>,
}

impl<'a> FramePipeline<'a> {
    pub fn new(
        decoder: &'a mut DecodeHandle,
        encoder: &'a mut EncodeHandle,
        scaler: ScalingContext,
        clock: PipelineClock,
        budget: FrameBudget,
        progress: &'a mut ProgressState,
    ) -> Self {
        progress.set_total_frames(budget.total());
        Self {
            decoder,
            encoder,
            scaler,
            clock,
            budget,
            progress,
            state: PipelineState::Idle,
            skip_before: None,
            summary: PipelineSummary {
                total_frames: budget.total(),
                ..PipelineSummary::default()
            },
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Runs the range to completion and writes the trailer.
    pub fn run(mut self, begin_offset_ms: i64) -> ClipResult<PipelineSummary> {
        match self.drive(begin_offset_ms) {
            Ok(()) => {
                self.enter(PipelineState::Done);
                self.summary.frames_decoded = self.clock.decoded_frames();
                self.summary.frames_written = self.clock.frame_index();
                Ok(self.summary)
            }
            Err(err) => {
                debug!("Pipeline failed while {}: {}", self.state, err);
                self.enter(PipelineState::Errored);
                Err(err)
            }
        }
    }

    fn enter(&mut self, state: PipelineState) {
        if self.state != state {
            trace!("Pipeline {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn drive(&mut self, begin_offset_ms: i64) -> ClipResult<()> {
        if begin_offset_ms > 0 {
            self.enter(PipelineState::Seeking);
            self.seek(begin_offset_ms)?;
        }

        let video_index = self.decoder.stream_index() as i32;
        loop {
            if self.budget.exhausted() {
                debug!(
                    "Frame budget of {} reached after {} packets",
                    self.budget.total(),
                    self.summary.packets_read
                );
                break;
            }
            self.enter(PipelineState::Reading);
            let Some(packet) = self.read_packet()? else {
                debug!(
                    "Source exhausted after {} of {} frames",
                    self.budget.consumed(),
                    self.budget.total()
                );
                break;
            };
            self.summary.packets_read += 1;
            if packet.stream_index != video_index {
                continue;
            }
            if is_preroll(self.skip_before, packet_timestamp(&packet)) {
                self.summary.preroll_packets += 1;
            } else {
                self.budget.consume();
                self.summary.video_packets += 1;
            }
            self.decode(Some(&packet))?;
        }

        self.enter(PipelineState::Flushing);
        self.decode(None)?;
        self.encode(None)?;

        self.enter(PipelineState::Finalizing);
        let path = self.encoder.path().to_path_buf();
        self.encoder
            .format_mut()
            .write_trailer()
            .map_err(|e| ClipError::MuxWrite {
                path,
                message: "could not write container trailer".to_string(),
                source: e,
            })?;
        Ok(())
    }

    fn seek(&mut self, begin_offset_ms: i64) -> ClipResult<()> {
        let target = seek_target(begin_offset_ms, self.decoder.time_base());
        let stream_index = self.decoder.stream_index() as i32;
        debug!(
            "Seeking stream {} to {} ms ({} in stream time base)",
            stream_index, begin_offset_ms, target
        );
        let ret = unsafe {
            ffi::av_seek_frame(
                self.decoder.format_mut().as_mut_ptr(),
                stream_index,
                target,
                ffi::AVSEEK_FLAG_BACKWARD as i32,
            )
        };
        if ret < 0 {
            return Err(ClipError::Seek {
                target,
                message: av_error_to_string(ret),
            });
        }
        unsafe {
            ffi::avcodec_flush_buffers(self.decoder.codec_mut().as_mut_ptr());
        }
        self.summary.seek_target = Some(target);
        self.skip_before = Some(target);
        Ok(())
    }


    fn read_packet(&mut self) -> ClipResult<Option<AVPacket>> {
        self.decoder
            .format_mut()
            .read_packet()
            .map_err(|e| ClipError::decode("could not read packet from source", e))
    }

    /// Feeds one packet (or the end-of-stream marker) to the decoder and
    /// pushes every frame it yields through scaling and encoding.
    fn decode(&mut self, packet: Option<&AVPacket>) -> ClipResult<()> {
        self.enter(PipelineState::Decoding);
        match self.decoder.codec_mut().send_packet(packet) {
            Ok(()) | Err(RsmpegError::DecoderFlushedError) => {}
            Err(e) => return Err(ClipError::decode("decoder rejected packet", e)),
        }

        loop {
            self.enter(PipelineState::Decoding);
            let frame = match self.decoder.codec_mut().receive_frame() {
                Ok(frame) => frame,
                Err(RsmpegError::DecoderDrainError) | Err(RsmpegError::DecoderFlushedError) => {
                    break;
                }
                Err(e) => return Err(ClipError::decode("decoder failed to produce frame", e)),
            };
            self.clock.note_decoded();
            let frame_ts = frame_timestamp(&frame);
            if is_preroll(self.skip_before, frame_ts) {
                self.summary.frames_skipped += 1;
                continue;
            }
            if self.summary.first_source_pts.is_none() {
                self.summary.first_source_pts = frame_ts;
            }

            self.enter(PipelineState::Scaling);
            let scaled = self.scaler.scale(&frame)?;
            self.encode(Some(scaled))?;
        }
        Ok(())
    }

    /// Sends a frame (or the flush marker) to the encoder and writes whatever
    /// packets come back, stamped from the synthetic clock.
    fn encode(&mut self, mut frame: Option<AVFrame>) -> ClipResult<()> {
        self.enter(PipelineState::Encoding);
        if let Some(frame) = frame.as_mut() {
            frame.set_pts(self.clock.next_submission());
        }
        self.encoder
            .codec_mut()
            .send_frame(frame.as_ref())
            .map_err(|e| ClipError::encode("encoder rejected frame", e))?;

        let stream_index = self.encoder.stream_index() as i32;
        loop {
            let mut packet = match self.encoder.codec_mut().receive_packet() {
                Ok(packet) => packet,
                Err(RsmpegError::EncoderDrainError) | Err(RsmpegError::EncoderFlushedError) => {
                    break;
                }
                Err(e) => return Err(ClipError::encode("encoder failed to produce packet", e)),
            };

            self.enter(PipelineState::Writing);
            let stamp = self.clock.next_stamp();
            packet.set_pts(stamp.pts);
            packet.set_dts(stamp.dts);
            packet.set_duration(stamp.duration);
            packet.set_stream_index(stream_index);
            packet.rescale_ts(self.clock.source_time_base(), self.encoder.time_base());

            let path = self.encoder.path().to_path_buf();
            self.encoder
                .format_mut()
                .interleaved_write_frame(&mut packet)
                .map_err(|e| ClipError::MuxWrite {
                    path,
                    message: format!("could not write packet {}", stamp.pts),
                    source: e,
                })?;
            self.progress.advance(self.clock.frame_index());
            self.enter(PipelineState::Encoding);
        }
        Ok(())
    }
}

/// Whether something stamped `timestamp` lies before the seek target. Untimed
/// packets and frames are always kept.
fn is_preroll(skip_before: Option<i64>, timestamp: Option<i64>) -> bool {
    matches!((skip_before, timestamp), (Some(target), Some(ts)) if ts < target)
}

fn known(ts: i64) -> Option<i64> {
    (ts != ffi::AV_NOPTS_VALUE).then_some(ts)
}

fn packet_timestamp(packet: &AVPacket) -> Option<i64> {
    known(packet.pts).or_else(|| known(packet.dts))
}

fn frame_timestamp(frame: &AVFrame) -> Option<i64> {
    known(frame.best_effort_timestamp).or_else(|| known(frame.pts))
}
