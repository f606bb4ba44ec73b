use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::env;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use webm_clipper::av::configure_ffmpeg_logging;
use webm_clipper::config::{self, ConfigSource};
use webm_clipper::logging::init_logging;
use webm_clipper::{
    probe_duration_ms, ClipSelection, DispatchOptions, Dispatcher, JobId, OutputPolicy,
    ProgressTable,
};

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video files to clip
    #[arg(required = true, value_name = "INPUT")]
    inputs: Vec<PathBuf>,

    /// Start of the clip, in milliseconds from the beginning of each input
    #[arg(long, default_value_t = 0, value_name = "MS")]
    begin: i64,

    /// End of the clip in milliseconds (defaults to three seconds after --begin,
    /// capped at the input's duration)
    #[arg(long, value_name = "MS")]
    end: Option<i64>,

    /// Directory that receives the generated clips
    #[arg(short, long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Run at most this many clips at once (default: all at once)
    #[arg(long = "max-jobs", value_name = "N")]
    max_jobs: Option<NonZeroUsize>,

    /// Path to the configuration file
    #[arg(short, long = "config", value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Print each input's duration in milliseconds and exit
    #[arg(long, default_value_t = false)]
    probe_duration: bool,

    /// Emit progress events as JSON lines on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Serialize)]
struct ProgressLine<'a> {
    job: JobId,
    source: &'a Path,
    percent: i32,
}

const DEFAULT_CLIP_MS: i64 = 3000;

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let loaded_config = config::load(args.config_file.as_deref())?;
    if let Some((_, source)) = &loaded_config {
        match source {
            ConfigSource::Env(path) => info!(
                "Loaded configuration from '{}' (via {}).",
                path.display(),
                config::CONFIG_ENV_VAR
            ),
            ConfigSource::Cli(path) | ConfigSource::Default(path) => {
                info!("Loaded configuration from '{}'.", path.display())
            }
        }
    }
    let cfg = loaded_config.map(|(cfg, _)| cfg).unwrap_or_default();
    configure_ffmpeg_logging(cfg.ffmpeg_log_level.as_deref());

    if args.probe_duration {
        for input in &args.inputs {
            let duration = probe_duration_ms(input)
                .with_context(|| format!("Failed to probe '{}'", input.display()))?;
            println!("{}\t{}", input.display(), duration);
        }
        return Ok(());
    }

    let output_dir = match args.output_dir.clone().or(cfg.output_directory.clone()) {
        Some(dir) => dir,
        None => env::current_dir().context("Failed to resolve the current directory")?,
    };
    let max_concurrent_jobs = args.max_jobs.or(cfg.max_concurrent_jobs);

    let selections: Vec<ClipSelection> = args
        .inputs
        .iter()
        .map(|input| {
            let end = resolve_end(input, args.begin, args.end);
            ClipSelection::new(input.clone(), args.begin, end)
        })
        .collect();
    let sources: HashMap<JobId, PathBuf> = selections
        .iter()
        .map(|s| (s.id, s.source_path.clone()))
        .collect();

    let (dispatcher, events) = Dispatcher::new(DispatchOptions {
        max_concurrent_jobs,
        policy: OutputPolicy::default(),
    });
    let batch = dispatcher.dispatch(&output_dir, selections);
    // Workers hold the remaining senders; the loop below ends with the last job.
    drop(dispatcher);

    let mut table = ProgressTable::new();
    for job in batch.job_ids() {
        table.track(job);
    }
    for event in events {
        table.apply(&event);
        let source = sources
            .get(&event.job)
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new(""));
        if args.json {
            let line = ProgressLine {
                job: event.job,
                source,
                percent: event.percent,
            };
            println!("{}", serde_json::to_string(&line)?);
        } else {
            info!("{}: {}% ({} pending)", source.display(), event.percent, table.pending());
        }
    }

    let outcomes = batch.wait();
    let mut failures = 0usize;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => {
                if !args.json {
                    println!("{}", report.output_path.display());
                }
            }
            Err(err) => {
                failures += 1;
                error!(
                    "Clipping '{}' failed ({}): {}",
                    outcome.source_path.display(),
                    err.kind(),
                    err
                );
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} clip(s) failed", failures, outcomes.len());
    }
    Ok(())
}

/// Picks the end offset for one input. A missing duration leaves the
/// decision to the job, which reports the unreadable source itself.
fn resolve_end(input: &Path, begin: i64, requested: Option<i64>) -> i64 {
    let duration = match probe_duration_ms(input) {
        Ok(duration) => Some(duration),
        Err(err) => {
            debug!("Duration probe for '{}' failed: {}", input.display(), err);
            None
        }
    };
    match (requested, duration) {
        (Some(end), Some(duration)) if end > duration => {
            warn!(
                "End offset {} ms is past the end of '{}' ({} ms); clamping",
                end,
                input.display(),
                duration
            );
            duration
        }
        (Some(end), _) => end,
        (None, Some(duration)) => duration.min(begin.saturating_add(DEFAULT_CLIP_MS)),
        (None, None) => begin.saturating_add(DEFAULT_CLIP_MS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_range_and_inputs() {
        let args = Args::try_parse_from([
            "webm_clipper",
            "--begin",
            "2000",
            "--end",
            "5000",
            "--max-jobs",
            "2",
            "a.mp4",
            "b.mkv",
        ])
        .unwrap();
        assert_eq!(args.begin, 2000);
        assert_eq!(args.end, Some(5000));
        assert_eq!(args.max_jobs, NonZeroUsize::new(2));
        assert_eq!(args.inputs.len(), 2);
    }

    #[test]
    fn requires_an_input() {
        assert!(Args::try_parse_from(["webm_clipper"]).is_err());
    }

    #[test]
    fn unreadable_inputs_fall_back_to_default_length() {
        let input = Path::new("/nonexistent/clip.mp4");
        assert_eq!(resolve_end(input, 1000, None), 4000);
        assert_eq!(resolve_end(input, 0, Some(9000)), 9000);
    }
}
