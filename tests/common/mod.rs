#![allow(dead_code)]

use rsmpeg::avformat::AVFormatContextInput;
use rsmpeg::ffi;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::Receiver;
use tempfile::TempDir;
use webm_clipper::ProgressEvent;

pub fn ensure_ffmpeg_present() {
    let out = Command::new("ffmpeg").arg("-version").output();
    match out {
        Ok(o) if o.status.success() => {}
        _ => panic!("ffmpeg CLI not found. Install ffmpeg and ensure it is on PATH."),
    }
}

/// Parameters for a synthetic `testsrc` input.
#[derive(Clone, Debug)]
pub struct SourceSpec {
    pub file_name: &'static str,
    /// lavfi video source, optionally with its own options (`color=c=gray`).
    pub pattern: &'static str,
    pub size: &'static str,
    pub rate: u32,
    pub duration_s: u32,
    pub video_bitrate: Option<&'static str>,
    /// Caps the rate with `-maxrate`/`-bufsize` alongside `video_bitrate`.
    pub max_rate: Option<(&'static str, &'static str)>,
    /// Keyframe interval in frames; one second when unset.
    pub gop: Option<u32>,
    pub with_audio: bool,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            file_name: "input.mkv",
            pattern: "testsrc",
            size: "320x240",
            rate: 30,
            duration_s: 10,
            video_bitrate: None,
            max_rate: None,
            gop: None,
            with_audio: false,
        }
    }
}

/// Encodes a synthetic clip, by default with one keyframe per second so seeks
/// land on whole-second boundaries.
pub fn gen_input(tmp: &TempDir, spec: &SourceSpec) -> PathBuf {
    let input = tmp.path().join(spec.file_name);
    let separator = if spec.pattern.contains('=') { ':' } else { '=' };
    let video_src = format!(
        "{}{}size={}:rate={}:duration={}",
        spec.pattern, separator, spec.size, spec.rate, spec.duration_s
    );
    let audio_src = format!("sine=frequency=1000:sample_rate=48000:duration={}", spec.duration_s);
    let gop = spec.gop.unwrap_or(spec.rate).to_string();

    let mut args: Vec<String> = vec!["-y".into(), "-f".into(), "lavfi".into(), "-i".into(), video_src];
    if spec.with_audio {
        args.extend(["-f".into(), "lavfi".into(), "-i".into(), audio_src]);
    }
    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "ultrafast".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-g".into(),
        gop,
    ]);
    if let Some(bitrate) = spec.video_bitrate {
        args.extend(["-b:v".into(), bitrate.to_string()]);
    }
    if let Some((max_rate, buf_size)) = spec.max_rate {
        args.extend([
            "-maxrate".into(),
            max_rate.to_string(),
            "-bufsize".into(),
            buf_size.to_string(),
        ]);
    }
    if spec.with_audio {
        args.extend(["-c:a".into(), "aac".into(), "-shortest".into()]);
    }
    args.push(input.to_string_lossy().to_string());

    let status = Command::new("ffmpeg")
        .args(&args)
        .status()
        .expect("run ffmpeg generator");
    assert!(status.success(), "ffmpeg generation of {} failed", spec.file_name);
    input
}

pub fn gen_default_input(tmp: &TempDir) -> PathBuf {
    gen_input(tmp, &SourceSpec::default())
}

pub fn write_non_media(tmp: &TempDir) -> PathBuf {
    let path = tmp.path().join("notes.txt");
    let mut f = File::create(&path).expect("create text file");
    writeln!(f, "this is not a video").unwrap();
    path
}

#[derive(Debug)]
pub struct MediaInfo {
    pub width: i32,
    pub height: i32,
    pub codec_id: ffi::AVCodecID,
    pub video_streams: usize,
    pub audio_streams: usize,
    pub duration_ms: i64,
}

pub fn inspect(path: &Path) -> MediaInfo {
    let cstr = CString::new(path.to_string_lossy().to_string()).unwrap();
    let ictx = AVFormatContextInput::open(cstr.as_c_str()).expect("open media file");
    let mut info = MediaInfo {
        width: 0,
        height: 0,
        codec_id: ffi::AV_CODEC_ID_NONE,
        video_streams: 0,
        audio_streams: 0,
        duration_ms: (ictx.duration / 1000).max(0),
    };
    for stream in ictx.streams() {
        let par = stream.codecpar();
        if par.codec_type == ffi::AVMEDIA_TYPE_VIDEO {
            if info.video_streams == 0 {
                info.width = par.width;
                info.height = par.height;
                info.codec_id = par.codec_id;
            }
            info.video_streams += 1;
        } else if par.codec_type == ffi::AVMEDIA_TYPE_AUDIO {
            info.audio_streams += 1;
        }
    }
    info
}

pub fn count_video_packets(path: &Path) -> usize {
    let cstr = CString::new(path.to_string_lossy().to_string()).unwrap();
    let mut ictx = AVFormatContextInput::open(cstr.as_c_str()).expect("open media file");
    let video_index = ictx
        .streams()
        .iter()
        .position(|s| s.codecpar().codec_type == ffi::AVMEDIA_TYPE_VIDEO)
        .expect("video stream") as i32;
    let mut count = 0;
    while let Some(packet) = ictx.read_packet().expect("read packet") {
        if packet.stream_index == video_index {
            count += 1;
        }
    }
    count
}

pub fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    out.sort();
    out
}

/// Drains the relay; only returns once every sender is gone.
pub fn collect_events(rx: Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    rx.iter().collect()
}
