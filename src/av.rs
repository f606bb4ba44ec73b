//! Thin helpers over raw libav calls that rsmpeg does not wrap.

use log::{debug, trace, warn};
use rsmpeg::avcodec::AVCodecContext;
use rsmpeg::ffi;
use std::env;
use std::ffi::{c_void, CStr, CString};

pub const FFMPEG_LOG_LEVEL_ENV: &str = "FFMPEG_LOG_LEVEL";

pub fn av_error_to_string(err: i32) -> String {
    let mut buf = [0 as std::os::raw::c_char; ffi::AV_ERROR_MAX_STRING_SIZE as usize];
    unsafe {
        if ffi::av_strerror(err, buf.as_mut_ptr(), buf.len()) == 0 {
            CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
        } else {
            format!("ffmpeg error {}", err)
        }
    }
}

pub fn pix_fmt_name(fmt: ffi::AVPixelFormat) -> String {
    unsafe {
        let ptr = ffi::av_get_pix_fmt_name(fmt);
        if ptr.is_null() {
            format!("pix_fmt({})", fmt)
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

pub fn codec_name(codec_id: ffi::AVCodecID) -> String {
    unsafe {
        let ptr = ffi::avcodec_get_name(codec_id);
        if ptr.is_null() {
            format!("codec({})", codec_id)
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

/// Sets a private encoder option. Unknown keys are ignored so one option table
/// can be shared by encoders that only understand part of it.
pub fn set_codec_option_str(ctx: &mut AVCodecContext, key: &str, value: &str) -> bool {
    let raw = ctx.as_mut_ptr();
    if raw.is_null() {
        warn!(
            "Failed to set codec option {}='{}': encoder context is null",
            key, value
        );
        return false;
    }
    let (Ok(k), Ok(v)) = (CString::new(key), CString::new(value)) else {
        warn!("Codec option {}='{}' contains interior NUL; skipped", key, value);
        return false;
    };
    let ret = unsafe {
        ffi::av_opt_set(
            raw as *mut c_void,
            k.as_ptr(),
            v.as_ptr(),
            ffi::AV_OPT_SEARCH_CHILDREN as i32,
        )
    };
    if ret == 0 {
        trace!("Codec option {}='{}' set", key, value);
        true
    } else if ret == ffi::AVERROR_OPTION_NOT_FOUND {
        debug!("Codec option {} not supported by this encoder", key);
        false
    } else {
        warn!(
            "Failed to set codec option {}='{}': {}",
            key,
            value,
            av_error_to_string(ret)
        );
        false
    }
}

pub fn log_encoder_state(stage: &str, ctx: &AVCodecContext, encoder_name: &str) {
    debug!(
        "Encoder {} [{}]: {}x{} pix_fmt={} time_base={}/{} bit_rate={} rc_max_rate={} rc_min_rate={} rc_buffer_size={} max_b_frames={}",
        encoder_name,
        stage,
        ctx.width,
        ctx.height,
        pix_fmt_name(ctx.pix_fmt),
        ctx.time_base.num,
        ctx.time_base.den,
        ctx.bit_rate,
        ctx.rc_max_rate,
        ctx.rc_min_rate,
        ctx.rc_buffer_size,
        ctx.max_b_frames
    );
}

pub fn parse_ffmpeg_log_level(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(num) = trimmed.parse::<i32>() {
        return Some(num);
    }
    let level = match trimmed.to_ascii_lowercase().as_str() {
        "quiet" => ffi::AV_LOG_QUIET as i32,
        "panic" => ffi::AV_LOG_PANIC as i32,
        "fatal" => ffi::AV_LOG_FATAL as i32,
        "error" => ffi::AV_LOG_ERROR as i32,
        "warning" | "warn" => ffi::AV_LOG_WARNING as i32,
        "info" => ffi::AV_LOG_INFO as i32,
        "verbose" => ffi::AV_LOG_VERBOSE as i32,
        "debug" => ffi::AV_LOG_DEBUG as i32,
        "trace" => ffi::AV_LOG_TRACE as i32,
        _ => return None,
    };
    Some(level)
}

pub fn ffmpeg_log_level_name(level: i32) -> &'static str {
    match level {
        x if x <= ffi::AV_LOG_QUIET as i32 => "quiet",
        x if x <= ffi::AV_LOG_PANIC as i32 => "panic",
        x if x <= ffi::AV_LOG_FATAL as i32 => "fatal",
        x if x <= ffi::AV_LOG_ERROR as i32 => "error",
        x if x <= ffi::AV_LOG_WARNING as i32 => "warning",
        x if x <= ffi::AV_LOG_INFO as i32 => "info",
        x if x <= ffi::AV_LOG_VERBOSE as i32 => "verbose",
        x if x <= ffi::AV_LOG_DEBUG as i32 => "debug",
        _ => "trace",
    }
}

/// Applies libav's global log level. `FFMPEG_LOG_LEVEL` wins over `fallback`
/// (usually the config file value); both default to `warning`.
pub fn configure_ffmpeg_logging(fallback: Option<&str>) -> i32 {
    let default_level = ffi::AV_LOG_WARNING as i32;
    let requested = env::var(FFMPEG_LOG_LEVEL_ENV).ok();
    let level = requested
        .as_deref()
        .and_then(parse_ffmpeg_log_level)
        .or_else(|| fallback.and_then(parse_ffmpeg_log_level))
        .unwrap_or(default_level);
    unsafe {
        ffi::av_log_set_level(level);
    }
    debug!(
        "FFmpeg log level set to {} (value={})",
        ffmpeg_log_level_name(level),
        level
    );
    if requested.is_none() && fallback.is_none() {
        trace!("{} not set; defaulting to warning", FFMPEG_LOG_LEVEL_ENV);
    }
    level
}
