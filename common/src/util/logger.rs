/// Initializes `env_logger` from `RUST_LOG`, defaulting to `info` when unset.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Maps the CLI `-v N` verbosity level (§7: 0 = final summary only …
/// 4 = per-cell diagnostics) onto a `log::LevelFilter`.
pub fn verbosity_to_level(v: u8) -> log::LevelFilter {
    match v {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}
