//! Per-job progress bookkeeping and the relay that carries it to the caller.
//!
//! Each job owns one [`ProgressState`]. Intermediate percentages never reach
//! 100; the terminal event (100 on success, [`FAILED_PERCENT`] on failure) is
//! sent exactly once, either explicitly or, if the job unwinds, on drop.

use crate::request::JobId;
use log::{debug, trace};
use serde::Serialize;
use std::sync::mpsc::Sender;

pub const COMPLETE_PERCENT: i32 = 100;
pub const FAILED_PERCENT: i32 = -1;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job: JobId,
    pub percent: i32,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.percent == COMPLETE_PERCENT || self.percent == FAILED_PERCENT
    }

    pub fn is_success(&self) -> bool {
        self.percent == COMPLETE_PERCENT
    }
}

/// Producer end of the progress relay; one clone per job.
#[derive(Clone, Debug)]
pub struct ProgressSink {
    tx: Sender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ProgressEvent) {
        // A dropped receiver means nobody is listening any more.
        if self.tx.send(event).is_err() {
            trace!("Progress receiver gone; dropped {:?}", event);
        }
    }
}

impl From<Sender<ProgressEvent>> for ProgressSink {
    fn from(tx: Sender<ProgressEvent>) -> Self {
        Self::new(tx)
    }
}

pub struct ProgressState {
    job: JobId,
    last_reported_percent: i32,
    total_frames: i64,
    sink: ProgressSink,
    finished: bool,
}

impl ProgressState {
    pub fn new(job: JobId, sink: ProgressSink) -> Self {
        Self {
            job,
            last_reported_percent: 0,
            total_frames: 1,
            sink,
            finished: false,
        }
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    pub fn last_reported_percent(&self) -> i32 {
        self.last_reported_percent
    }

    pub fn set_total_frames(&mut self, total_frames: i64) {
        self.total_frames = total_frames.max(1);
    }

    /// Recomputes the percentage after `frame_index` frames have been
    /// transcoded, emitting only when it moved. Capped at 99 so the terminal
    /// 100 stays unique.
    pub fn advance(&mut self, frame_index: i64) {
        let percent = ((frame_index.max(0) * 100) / self.total_frames).min(99) as i32;
        if percent > self.last_reported_percent {
            self.last_reported_percent = percent;
            debug!("Job {} progress: {}%", self.job.short(), percent);
            self.sink.send(ProgressEvent {
                job: self.job,
                percent,
            });
        }
    }

    pub fn complete(mut self) {
        self.finish(COMPLETE_PERCENT);
    }

    pub fn fail(mut self) {
        self.finish(FAILED_PERCENT);
    }

    fn finish(&mut self, percent: i32) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.last_reported_percent = percent;
        self.sink.send(ProgressEvent {
            job: self.job,
            percent,
        });
    }
}

impl Drop for ProgressState {
    fn drop(&mut self) {
        self.finish(FAILED_PERCENT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn percents(rx: &mpsc::Receiver<ProgressEvent>) -> Vec<i32> {
        rx.try_iter().map(|e| e.percent).collect()
    }

    #[test]
    fn emits_only_on_change_and_caps_before_terminal() {
        let (tx, rx) = mpsc::channel();
        let mut state = ProgressState::new(JobId::new(), tx.into());
        state.set_total_frames(4);
        for index in 0..=4 {
            state.advance(index);
        }
        state.advance(4);
        state.complete();
        assert_eq!(percents(&rx), vec![25, 50, 75, 99, 100]);
    }

    #[test]
    fn floors_percentages() {
        let (tx, rx) = mpsc::channel();
        let mut state = ProgressState::new(JobId::new(), tx.into());
        state.set_total_frames(90);
        state.advance(1);
        state.advance(2);
        assert_eq!(percents(&rx), vec![1, 2]);
        assert_eq!(state.last_reported_percent(), 2);
        state.fail();
        assert_eq!(percents(&rx), vec![-1]);
    }

    #[test]
    fn dropping_unfinished_state_reports_failure_once() {
        let (tx, rx) = mpsc::channel();
        {
            let mut state = ProgressState::new(JobId::new(), tx.into());
            state.set_total_frames(10);
            state.advance(5);
        }
        assert_eq!(percents(&rx), vec![50, -1]);
    }

    #[test]
    fn completion_is_not_followed_by_failure() {
        let (tx, rx) = mpsc::channel();
        let state = ProgressState::new(JobId::new(), tx.into());
        state.complete();
        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_success());
        assert!(events[0].is_terminal());
    }

    #[test]
    fn zero_total_is_treated_as_single_frame() {
        let (tx, rx) = mpsc::channel();
        let mut state = ProgressState::new(JobId::new(), tx.into());
        state.set_total_frames(0);
        state.advance(1);
        assert_eq!(percents(&rx), vec![99]);
    }

    #[test]
    fn closed_receiver_is_tolerated() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut state = ProgressState::new(JobId::new(), tx.into());
        state.advance(1);
        state.complete();
    }
}
