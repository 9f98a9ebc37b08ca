use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "TESTGRAFT_LOG";

/// Install the stderr subscriber. Filter comes from `TESTGRAFT_LOG`, then
/// `RUST_LOG`, then `info` (`debug` when `verbose`).
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
