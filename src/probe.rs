//! Opens a source, picks its video stream and readies a decoder for it.

use crate::av::{codec_name, pix_fmt_name};
use crate::error::{ClipError, ClipResult};
use crate::handle::{alloc_codec_context, DecodeHandle, MediaHandle};
use log::{debug, info, log_enabled, Level};
use rsmpeg::avcodec::AVCodec;
use rsmpeg::avformat::AVFormatContextInput;
use rsmpeg::ffi;
use std::ffi::CString;
use std::path::Path;

/// A decode-side handle plus the stream facts the rest of the job keys off.
pub struct ProbedSource {
    pub handle: DecodeHandle,
    /// Frame rate guessed from container and stream metadata.
    pub frame_rate: ffi::AVRational,
    pub width: i32,
    pub height: i32,
    pub pix_fmt: ffi::AVPixelFormat,
    /// Codec bitrate, falling back to the container's; `None` when neither is
    /// known.
    pub bit_rate: Option<i64>,
}

pub(crate) fn path_to_cstring(path: &Path) -> Option<CString> {
    CString::new(path.to_string_lossy().into_owned()).ok()
}

fn open_input(path: &Path) -> ClipResult<AVFormatContextInput> {
    let cpath = path_to_cstring(path).ok_or_else(|| ClipError::SourceOpen {
        path: path.to_path_buf(),
        message: "path contains an interior NUL byte".to_string(),
        source: None,
    })?;
    let mut input = AVFormatContextInput::open(cpath.as_c_str()).map_err(|e| ClipError::SourceOpen {
        path: path.to_path_buf(),
        message: "could not open or parse container".to_string(),
        source: Some(e),
    })?;
    if log_enabled!(Level::Debug) {
        let _ = input.dump(0, cpath.as_c_str());
    }
    Ok(input)
}

/// Duration of a source in milliseconds, as the container reports it.
pub fn probe_duration_ms(path: &Path) -> ClipResult<i64> {
    let input = open_input(path)?;
    let duration = input.duration;
    if duration <= 0 {
        return Err(ClipError::SourceOpen {
            path: path.to_path_buf(),
            message: "container does not report a duration".to_string(),
            source: None,
        });
    }
    Ok((duration as f64 / ffi::AV_TIME_BASE as f64 * 1000.0) as i64)
}

fn guess_frame_rate(input: &mut AVFormatContextInput, stream_index: usize) -> ffi::AVRational {
    let stream = input.streams()[stream_index].as_ptr() as *mut ffi::AVStream;
    unsafe { ffi::av_guess_frame_rate(input.as_mut_ptr(), stream, std::ptr::null_mut()) }
}

/// Opens `path`, selects its first video stream and opens a decoder for it.
pub fn probe_source(path: &Path) -> ClipResult<ProbedSource> {
    let mut input = open_input(path)?;

    let stream_index = input
        .streams()
        .iter()
        .position(|st| st.codecpar().codec_type == ffi::AVMEDIA_TYPE_VIDEO)
        .ok_or_else(|| ClipError::NoVideoStream {
            path: path.to_path_buf(),
        })?;

    let frame_rate = guess_frame_rate(&mut input, stream_index);
    if frame_rate.num <= 0 || frame_rate.den <= 0 {
        return Err(ClipError::SourceOpen {
            path: path.to_path_buf(),
            message: format!(
                "cannot determine frame rate of video stream {}",
                stream_index
            ),
            source: None,
        });
    }

    let container_bit_rate = input.bit_rate;
    let stream = &input.streams()[stream_index];
    let codecpar = stream.codecpar();
    let codec_id = codecpar.codec_id;
    let decoder = AVCodec::find_decoder(codec_id).ok_or_else(|| ClipError::CodecUnavailable {
        codec: codec_name(codec_id),
    })?;

    let mut decode_context = alloc_codec_context(&decoder).ok_or_else(|| ClipError::CodecInit {
        role: "decoder",
        codec: codec_name(codec_id),
        message: "could not allocate codec context".to_string(),
        source: None,
    })?;
    decode_context
        .apply_codecpar(&codecpar)
        .map_err(|e| ClipError::CodecInit {
            role: "decoder",
            codec: codec_name(codec_id),
            message: "could not copy stream parameters".to_string(),
            source: Some(e),
        })?;
    decode_context.set_time_base(stream.time_base);
    decode_context.set_framerate(frame_rate);
    decode_context.open(None).map_err(|e| ClipError::CodecInit {
        role: "decoder",
        codec: codec_name(codec_id),
        message: "could not open codec".to_string(),
        source: Some(e),
    })?;

    let bit_rate = [decode_context.bit_rate, container_bit_rate]
        .into_iter()
        .find(|rate| *rate > 0);

    info!(
        "Probed '{}': video stream {} {} {}x{} {} @ {}/{} fps, bitrate {}",
        path.display(),
        stream_index,
        codec_name(codec_id),
        decode_context.width,
        decode_context.height,
        pix_fmt_name(decode_context.pix_fmt),
        frame_rate.num,
        frame_rate.den,
        bit_rate
            .map(|b| format!("{} bps", b))
            .unwrap_or_else(|| "unknown".to_string())
    );
    debug!(
        "Source stream time base {}/{}",
        stream.time_base.num, stream.time_base.den
    );

    let width = decode_context.width;
    let height = decode_context.height;
    let pix_fmt = decode_context.pix_fmt;

    Ok(ProbedSource {
        handle: MediaHandle::new("decode", path, input, decode_context, stream_index),
        frame_rate,
        width,
        height,
        pix_fmt,
        bit_rate,
    })
}
