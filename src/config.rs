use anyhow::{bail, Context, Result};
use log::debug;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "WEBM_CLIPPER_CONFIG";
const APP_DIR: &str = "webm-clipper";
const APP_FILE: &str = "webm-clipper.toml";

/// Settings read from `config.toml`. Every key is optional; command-line
/// flags take precedence over whatever the file says.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub output_directory: Option<PathBuf>,
    pub max_concurrent_jobs: Option<NonZeroUsize>,
    pub ffmpeg_log_level: Option<String>,
}

/// Where the loaded file came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    Default(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::Cli(path) | ConfigSource::Env(path) | ConfigSource::Default(path) => path,
        }
    }
}

pub fn load(path_override: Option<&Path>) -> Result<Option<(Config, ConfigSource)>> {
    let mut candidates = Vec::new();

    if let Some(path) = path_override {
        // An explicit path that is missing is an error, not a fallthrough.
        if !path.exists() {
            bail!("Configuration file {} does not exist", path.display());
        }
        candidates.push(ConfigSource::Cli(path.to_path_buf()));
    } else {
        if let Some(env_path) = env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
            candidates.push(ConfigSource::Env(PathBuf::from(env_path)));
        }
        candidates.extend(
            default_config_candidates()
                .into_iter()
                .map(ConfigSource::Default),
        );
    }

    for source in candidates {
        let candidate = source.path();
        if candidate.as_os_str().is_empty() || !candidate.exists() {
            continue;
        }

        let contents = fs::read_to_string(candidate).with_context(|| {
            format!(
                "Failed to read configuration file at {}",
                candidate.display()
            )
        })?;
        let config = parse_config(&contents, candidate)?;
        debug!("Parsed configuration from {}: {:?}", candidate.display(), config);

        return Ok(Some((config, source)));
    }

    Ok(None)
}

pub fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    toml::from_str(contents)
        .with_context(|| format!("Invalid configuration in {}", path.display()))
}

pub fn default_config_candidates() -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    let mut push_unique = |path: PathBuf, out: &mut Vec<PathBuf>| {
        if !path.as_os_str().is_empty() && seen.insert(path.clone()) {
            out.push(path);
        }
    };

    if let Some(xdg_config) = env::var_os("XDG_CONFIG_HOME").filter(|val| !val.is_empty()) {
        push_unique(
            PathBuf::from(xdg_config).join(APP_DIR).join("config.toml"),
            &mut out,
        );
    }

    if let Some(home) = detect_home_dir() {
        push_unique(
            home.join(".config").join(APP_DIR).join("config.toml"),
            &mut out,
        );
        push_unique(home.join(APP_FILE), &mut out);
    }

    if let Ok(current_dir) = env::current_dir() {
        push_unique(current_dir.join(APP_FILE), &mut out);
    }

    push_unique(
        PathBuf::from("/etc").join(APP_DIR).join("config.toml"),
        &mut out,
    );

    out
}

fn detect_home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .filter(|val| !val.is_empty())
        .map(PathBuf::from)
}
