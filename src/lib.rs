//! Cuts a time range out of a video and re-encodes it as a small VP9 WebM
//! preview. Jobs run on their own threads and report progress over a channel.

pub mod av;
pub mod config;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod handle;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod request;
pub mod scale;

pub use dispatcher::{Batch, DispatchOptions, Dispatcher, JobOutcome, ProgressTable, RowStatus};
pub use encoder::{OutputPolicy, WEBM_PREVIEW};
pub use error::{ClipError, ClipResult, ErrorKind};
pub use job::{run_clip, JobReport, TranscodeJob};
pub use probe::probe_duration_ms;
pub use progress::{ProgressEvent, ProgressSink, COMPLETE_PERCENT, FAILED_PERCENT};
pub use request::{ClipRequest, ClipSelection, JobId};
