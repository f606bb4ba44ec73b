//! The encoder bitrate is the smaller of the source bitrate and the size budget.

#[path = "common/mod.rs"]
mod common;

use std::sync::mpsc;
use tempfile::TempDir;
use webm_clipper::{run_clip, ClipRequest, OutputPolicy, ProgressSink};

#[test]
fn high_bitrate_source_is_capped_by_budget() -> Result<(), Box<dyn std::error::Error>> {
    common::ensure_ffmpeg_present();

    let tmp = TempDir::new()?;
    let input = common::gen_input(
        &tmp,
        &common::SourceSpec {
            file_name: "high.mp4",
            duration_s: 4,
            video_bitrate: Some("2M"),
            ..common::SourceSpec::default()
        },
    );
    let (tx, _rx) = mpsc::channel();
    let request = ClipRequest::new(&input, tmp.path().join("clips"), 0, 3000);
    let report = run_clip(request, &OutputPolicy::default(), ProgressSink::new(tx))?;

    let source = report.source_bit_rate.expect("mp4 records a bitrate");
    assert!(source > 33_332, "source bitrate {} should exceed the budget", source);
    assert_eq!(report.encoder.bit_rate, 33_332);
    assert_eq!(report.encoder.rc_max_rate, 33_332);
    assert_eq!(report.encoder.rc_min_rate, 33_332);
    assert_eq!(report.encoder.rc_buffer_size, 100_000);
    Ok(())
}

#[test]
fn low_bitrate_source_keeps_its_own_rate() -> Result<(), Box<dyn std::error::Error>> {
    common::ensure_ffmpeg_present();

    let tmp = TempDir::new()?;
    let input = common::gen_input(
        &tmp,
        &common::SourceSpec {
            file_name: "low.mp4",
            pattern: "color=c=gray",
            size: "64x64",
            rate: 10,
            duration_s: 6,
            video_bitrate: Some("8k"),
            max_rate: Some(("8k", "16k")),
            ..common::SourceSpec::default()
        },
    );
    let (tx, _rx) = mpsc::channel();
    let request = ClipRequest::new(&input, tmp.path().join("clips"), 1000, 4000);
    let report = run_clip(request, &OutputPolicy::default(), ProgressSink::new(tx))?;

    let source = report.source_bit_rate.expect("mp4 records a bitrate");
    assert!(source < 33_332, "source bitrate {} should be under the budget", source);
    assert_eq!(report.encoder.bit_rate, source);
    assert_eq!(report.encoder.rc_max_rate, source);
    assert_eq!(report.encoder.rc_min_rate, source);
    Ok(())
}
