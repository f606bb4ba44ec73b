//! Exclusive ownership of one container context plus the codec bound to its
//! selected stream.
//!
//! A handle only exists once every sub-resource is acquired; anything acquired
//! before a failing step is an owned local that drops on the way out, so a
//! half-built handle can neither leak nor double-free. Fields are declared
//! codec-first because Rust drops fields in declaration order and the codec
//! context must go before the container (and its file handle) it was bound to.

use log::trace;
use rsmpeg::avcodec::{AVCodecContext, AVCodecRef};
use rsmpeg::avformat::{AVFormatContextInput, AVFormatContextOutput};
use rsmpeg::ffi;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

pub struct MediaHandle<F> {
    codec: AVCodecContext,
    format: F,
    stream_index: usize,
    path: PathBuf,
    role: &'static str,
}

/// Demuxer plus decoder of the selected video stream.
pub type DecodeHandle = MediaHandle<AVFormatContextInput>;
/// Muxer plus encoder of the single output stream.
pub type EncodeHandle = MediaHandle<AVFormatContextOutput>;

impl<F> MediaHandle<F> {
    pub(crate) fn new(
        role: &'static str,
        path: &Path,
        format: F,
        codec: AVCodecContext,
        stream_index: usize,
    ) -> Self {
        trace!("Acquired {} handle for '{}'", role, path.display());
        Self {
            codec,
            format,
            stream_index,
            path: path.to_path_buf(),
            role,
        }
    }

    pub fn codec(&self) -> &AVCodecContext {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut AVCodecContext {
        &mut self.codec
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    pub fn format_mut(&mut self) -> &mut F {
        &mut self.format
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<F> Drop for MediaHandle<F> {
    fn drop(&mut self) {
        trace!("Releasing {} handle for '{}'", self.role, self.path.display());
    }
}

impl DecodeHandle {
    pub fn time_base(&self) -> ffi::AVRational {
        self.format.streams()[self.stream_index].time_base
    }
}

impl EncodeHandle {
    /// The muxer may rewrite the stream time base while writing the header, so
    /// this always reads the live value.
    pub fn time_base(&self) -> ffi::AVRational {
        self.format.streams()[self.stream_index].time_base
    }
}

/// Allocates a codec context, reporting allocation failure instead of
/// aborting.
pub(crate) fn alloc_codec_context(codec: &AVCodecRef) -> Option<AVCodecContext> {
    let raw = unsafe { ffi::avcodec_alloc_context3(codec.as_ptr()) };
    NonNull::new(raw).map(|ptr| unsafe { AVCodecContext::from_raw(ptr) })
}
