//! Batches run independently, relay progress over one channel and never
//! share an output file.

#[path = "common/mod.rs"]
mod common;

use std::collections::HashSet;
use std::num::NonZeroUsize;
use tempfile::TempDir;
use webm_clipper::{ClipSelection, DispatchOptions, Dispatcher, ErrorKind, ProgressTable};

#[test]
fn same_selection_twice_yields_two_files() -> Result<(), Box<dyn std::error::Error>> {
    common::ensure_ffmpeg_present();

    let tmp = TempDir::new()?;
    let input = common::gen_input(
        &tmp,
        &common::SourceSpec {
            duration_s: 3,
            ..common::SourceSpec::default()
        },
    );
    let out_dir = tmp.path().join("clips");

    let (dispatcher, rx) = Dispatcher::new(DispatchOptions::default());
    let batch = dispatcher.dispatch(
        &out_dir,
        vec![
            ClipSelection::new(&input, 0, 1000),
            ClipSelection::new(&input, 0, 1000),
        ],
    );
    drop(dispatcher);
    let events = common::collect_events(rx);
    let outcomes = batch.wait();

    assert_eq!(outcomes.len(), 2);
    let paths: HashSet<_> = outcomes
        .iter()
        .map(|o| o.result.as_ref().expect("clip succeeds").output_path.clone())
        .collect();
    assert_eq!(paths.len(), 2);
    assert_eq!(common::files_with_extension(&out_dir, "webm").len(), 2);
    assert_eq!(events.iter().filter(|e| e.percent == 100).count(), 2);
    Ok(())
}

#[test]
fn one_bad_input_does_not_disturb_the_rest() -> Result<(), Box<dyn std::error::Error>> {
    common::ensure_ffmpeg_present();

    let tmp = TempDir::new()?;
    let good = common::gen_input(
        &tmp,
        &common::SourceSpec {
            duration_s: 3,
            ..common::SourceSpec::default()
        },
    );
    let bad = common::write_non_media(&tmp);
    let out_dir = tmp.path().join("clips");

    let (dispatcher, rx) = Dispatcher::new(DispatchOptions {
        max_concurrent_jobs: NonZeroUsize::new(1),
        ..DispatchOptions::default()
    });
    let selections = vec![
        ClipSelection::new(&good, 0, 1000),
        ClipSelection::new(&bad, 0, 1000),
        ClipSelection::new(&good, 1000, 2000),
    ];
    let ids: Vec<_> = selections.iter().map(|s| s.id).collect();
    let batch = dispatcher.dispatch(&out_dir, selections);
    assert_eq!(batch.worker_count(), 1);
    drop(dispatcher);

    let mut table = ProgressTable::new();
    for id in &ids {
        table.track(*id);
    }
    for event in rx {
        table.apply(&event);
    }
    let outcomes = batch.wait();

    assert!(table.is_idle());
    assert_eq!(table.failed(), 1);
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[1].error_kind(), Some(ErrorKind::SourceOpenError));
    assert!(outcomes[2].is_success());
    assert_eq!(common::files_with_extension(&out_dir, "webm").len(), 2);
    Ok(())
}
