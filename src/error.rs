//! Failure taxonomy for clip jobs.
//!
//! Every stage fails fast: the first error aborts the job and is surfaced to the
//! caller as a single terminal progress event. [`ClipError::kind`] collapses the
//! detailed error into the stable [`ErrorKind`] that event consumers match on.

use rsmpeg::error::RsmpegError;
use std::path::PathBuf;
use strum_macros::{AsRefStr, Display, EnumIter};
use thiserror::Error;

pub type ClipResult<T> = std::result::Result<T, ClipError>;

#[allow(clippy::enum_variant_names)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Display, AsRefStr, EnumIter)]
pub enum ErrorKind {
    SourceOpenError,
    NoVideoStreamError,
    CodecUnavailableError,
    CodecInitError,
    EncoderAllocError,
    CodecNotFoundError,
    OutputOpenError,
    HeaderWriteError,
    SeekError,
    DecodeError,
    ScaleError,
    EncodeError,
    MuxWriteError,
    InvalidRangeError,
    IoError,
    WorkerPanicError,
}

#[derive(Debug, Error)]
pub enum ClipError {
    #[error("invalid range: begin ({begin_ms} ms) must be >= 0 and before end ({end_ms} ms)")]
    InvalidRange { begin_ms: i64, end_ms: i64 },

    #[error("failed to open source '{}': {message}", path.display())]
    SourceOpen {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<RsmpegError>,
    },

    #[error("no video stream found in '{}'", path.display())]
    NoVideoStream { path: PathBuf },

    #[error("no decoder available for codec {codec}")]
    CodecUnavailable { codec: String },

    #[error("failed to initialize {role} codec {codec}: {message}")]
    CodecInit {
        role: &'static str,
        codec: String,
        message: String,
        #[source]
        source: Option<RsmpegError>,
    },

    #[error("failed to allocate encoder context for {codec}")]
    EncoderAlloc { codec: String },

    #[error("encoder {codec} not found")]
    CodecNotFound { codec: String },

    #[error("failed to open output '{}': {message}", path.display())]
    OutputOpen {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<RsmpegError>,
    },

    #[error("failed to write container header for '{}'", path.display())]
    HeaderWrite {
        path: PathBuf,
        #[source]
        source: RsmpegError,
    },

    #[error("failed to seek to {target} (stream time base): {message}")]
    Seek { target: i64, message: String },

    #[error("decode failed: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<RsmpegError>,
    },

    #[error("scaling failed: {message}")]
    Scale {
        message: String,
        #[source]
        source: Option<RsmpegError>,
    },

    #[error("encode failed: {message}")]
    Encode {
        message: String,
        #[source]
        source: RsmpegError,
    },

    #[error("failed to write to '{}': {message}", path.display())]
    MuxWrite {
        path: PathBuf,
        message: String,
        #[source]
        source: RsmpegError,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("clip worker panicked: {message}")]
    WorkerPanic { message: String },
}

impl ClipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClipError::InvalidRange { .. } => ErrorKind::InvalidRangeError,
            ClipError::SourceOpen { .. } => ErrorKind::SourceOpenError,
            ClipError::NoVideoStream { .. } => ErrorKind::NoVideoStreamError,
            ClipError::CodecUnavailable { .. } => ErrorKind::CodecUnavailableError,
            ClipError::CodecInit { .. } => ErrorKind::CodecInitError,
            ClipError::EncoderAlloc { .. } => ErrorKind::EncoderAllocError,
            ClipError::CodecNotFound { .. } => ErrorKind::CodecNotFoundError,
            ClipError::OutputOpen { .. } => ErrorKind::OutputOpenError,
            ClipError::HeaderWrite { .. } => ErrorKind::HeaderWriteError,
            ClipError::Seek { .. } => ErrorKind::SeekError,
            ClipError::Decode { .. } => ErrorKind::DecodeError,
            ClipError::Scale { .. } => ErrorKind::ScaleError,
            ClipError::Encode { .. } => ErrorKind::EncodeError,
            ClipError::MuxWrite { .. } => ErrorKind::MuxWriteError,
            ClipError::Io { .. } => ErrorKind::IoError,
            ClipError::WorkerPanic { .. } => ErrorKind::WorkerPanicError,
        }
    }

    pub(crate) fn decode(message: impl Into<String>, source: RsmpegError) -> Self {
        ClipError::Decode {
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn encode(message: impl Into<String>, source: RsmpegError) -> Self {
        ClipError::Encode {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn kind_names_match_taxonomy() {
        assert_eq!(ErrorKind::SourceOpenError.to_string(), "SourceOpenError");
        assert_eq!(ErrorKind::InvalidRangeError.as_ref(), "InvalidRangeError");
        assert!(ErrorKind::iter().all(|kind| kind.as_ref().ends_with("Error")));
    }

    #[test]
    fn invalid_range_reports_its_kind() {
        let err = ClipError::InvalidRange {
            begin_ms: 500,
            end_ms: 500,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidRangeError);
        assert!(err.to_string().contains("500 ms"));
    }

    #[test]
    fn decode_helper_keeps_source() {
        let err = ClipError::decode("bad packet", RsmpegError::AVError(-22));
        assert_eq!(err.kind(), ErrorKind::DecodeError);
        assert!(std::error::Error::source(&err).is_some());
    }
}
