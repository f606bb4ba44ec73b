use std::env;

/// Routes `log` records to stderr, defaulting to `info` when `RUST_LOG` is
/// unset. Safe to call more than once.
pub fn init_logging() {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Info)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr);
    if let Ok(spec) = env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    let _ = builder.try_init();
}
