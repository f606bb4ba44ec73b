//! Builds and opens the output side of a job: muxer, encoder and the single
//! video stream tying them together.

use crate::av::{log_encoder_state, pix_fmt_name, set_codec_option_str};
use crate::error::{ClipError, ClipResult};
use crate::handle::{alloc_codec_context, EncodeHandle, MediaHandle};
use crate::probe::{path_to_cstring, ProbedSource};
use cstr::cstr;
use log::{debug, info};
use rsmpeg::avcodec::AVCodec;
use rsmpeg::avformat::AVFormatContextOutput;
use rsmpeg::avutil::ra;
use rsmpeg::ffi;
use serde::Serialize;
use std::ffi::CStr;
use std::path::Path;

/// Fixed shape of every clip this crate produces.
#[derive(Clone, Debug)]
pub struct OutputPolicy {
    pub width: i32,
    pub height: i32,
    pub extension: &'static str,
    pub encoder_name: &'static CStr,
    pub max_file_size_bytes: i64,
    pub max_duration_ms: i64,
    /// Private encoder options favouring speed over quality.
    pub speed_options: &'static [(&'static str, &'static str)],
}

pub const WEBM_PREVIEW: OutputPolicy = OutputPolicy {
    width: 100,
    height: 100,
    extension: "webm",
    encoder_name: cstr!("libvpx-vp9"),
    max_file_size_bytes: 100_000,
    max_duration_ms: 3_000,
    speed_options: &[("preset", "fast"), ("deadline", "realtime"), ("cpu-used", "8")],
};

impl Default for OutputPolicy {
    fn default() -> Self {
        WEBM_PREVIEW
    }
}

impl OutputPolicy {
    /// Bitrate that fits the longest allowed clip into the size budget, one
    /// unit under the exact quotient.
    pub fn budget_bit_rate(&self) -> i64 {
        (self.max_file_size_bytes as f64 / (self.max_duration_ms as f64 / 1000.0) - 1.0) as i64
    }

    /// The smaller of the budget and the source's own bitrate. An unknown
    /// source bitrate leaves the budget in charge.
    pub fn bit_rate_ceiling(&self, source_bit_rate: Option<i64>) -> i64 {
        let budget = self.budget_bit_rate();
        match source_bit_rate {
            Some(source) if source > 0 => source.min(budget),
            _ => budget,
        }
    }
}

/// What the encoder was actually configured with.
#[derive(Clone, Debug, Serialize)]
pub struct EncoderSettings {
    pub encoder: String,
    pub width: i32,
    pub height: i32,
    pub pix_fmt: String,
    pub time_base: (i32, i32),
    pub bit_rate: i64,
    pub rc_max_rate: i64,
    pub rc_min_rate: i64,
    pub rc_buffer_size: i32,
}

pub struct ConfiguredEncoder {
    pub handle: EncodeHandle,
    pub settings: EncoderSettings,
}

fn output_open_error(path: &Path, message: &str, source: Option<rsmpeg::error::RsmpegError>) -> ClipError {
    ClipError::OutputOpen {
        path: path.to_path_buf(),
        message: message.to_string(),
        source,
    }
}

/// Opens `output_path`, configures an encoder from `source` and `policy`, and
/// writes the container header.
pub fn configure_encoder(
    source: &ProbedSource,
    output_path: &Path,
    policy: &OutputPolicy,
) -> ClipResult<ConfiguredEncoder> {
    let encoder_label = policy.encoder_name.to_string_lossy().into_owned();

    let cpath = path_to_cstring(output_path)
        .ok_or_else(|| output_open_error(output_path, "path contains an interior NUL byte", None))?;
    let mut output = AVFormatContextOutput::create(cpath.as_c_str())
        .map_err(|e| output_open_error(output_path, "could not create output container", Some(e)))?;

    let encoder = AVCodec::find_encoder_by_name(policy.encoder_name).ok_or_else(|| {
        ClipError::CodecNotFound {
            codec: encoder_label.clone(),
        }
    })?;
    let mut encode_context = alloc_codec_context(&encoder).ok_or_else(|| ClipError::EncoderAlloc {
        codec: encoder_label.clone(),
    })?;

    for (key, value) in policy.speed_options {
        set_codec_option_str(&mut encode_context, key, value);
    }

    let decoder = source.handle.codec();
    encode_context.set_width(policy.width);
    encode_context.set_height(policy.height);
    encode_context.set_sample_aspect_ratio(ra(policy.width, policy.height));
    let pix_fmt = encoder
        .pix_fmts()
        .and_then(|formats| formats.first().copied())
        .unwrap_or(decoder.pix_fmt);
    encode_context.set_pix_fmt(pix_fmt);
    encode_context.set_max_b_frames(decoder.max_b_frames);

    let time_base = ra(source.frame_rate.den, source.frame_rate.num);
    encode_context.set_time_base(time_base);
    encode_context.set_framerate(source.frame_rate);

    let bit_rate = policy.bit_rate_ceiling(source.bit_rate);
    encode_context.set_bit_rate(bit_rate);
    unsafe {
        let raw = encode_context.as_mut_ptr();
        (*raw).rc_max_rate = bit_rate;
        (*raw).rc_min_rate = bit_rate;
        (*raw).rc_buffer_size = policy.max_file_size_bytes.clamp(1, i32::MAX as i64) as i32;
    }
    debug!(
        "Bitrate ceiling {} bps (budget {} bps, source {:?})",
        bit_rate,
        policy.budget_bit_rate(),
        source.bit_rate
    );

    let container_flags = unsafe { (*(*output.as_ptr()).oformat).flags };
    if container_flags & ffi::AVFMT_GLOBALHEADER as i32 != 0 {
        unsafe {
            (*encode_context.as_mut_ptr()).flags |= ffi::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
    }

    log_encoder_state("setup", &encode_context, &encoder_label);

    encode_context.open(None).map_err(|e| ClipError::CodecInit {
        role: "encoder",
        codec: encoder_label.clone(),
        message: "could not open codec".to_string(),
        source: Some(e),
    })?;

    let stream_index = {
        let mut stream = output.new_stream();
        stream.set_codecpar(encode_context.extract_codecpar());
        stream.set_time_base(encode_context.time_base);
        stream.index as usize
    };

    output
        .write_header(&mut None)
        .map_err(|e| ClipError::HeaderWrite {
            path: output_path.to_path_buf(),
            source: e,
        })?;

    let settings = EncoderSettings {
        encoder: encoder_label,
        width: encode_context.width,
        height: encode_context.height,
        pix_fmt: pix_fmt_name(encode_context.pix_fmt),
        time_base: (encode_context.time_base.num, encode_context.time_base.den),
        bit_rate: encode_context.bit_rate,
        rc_max_rate: encode_context.rc_max_rate,
        rc_min_rate: encode_context.rc_min_rate,
        rc_buffer_size: encode_context.rc_buffer_size,
    };
    info!(
        "Encoder {} ready: {}x{} {} time base {}/{}, {} bps -> '{}'",
        settings.encoder,
        settings.width,
        settings.height,
        settings.pix_fmt,
        settings.time_base.0,
        settings.time_base.1,
        settings.bit_rate,
        output_path.display()
    );

    Ok(ConfiguredEncoder {
        handle: MediaHandle::new("encode", output_path, output, encode_context, stream_index),
        settings,
    })
}
