use tracing_subscriber::EnvFilter;

/// Initialise logging for hosts embedding the engine. With `debug` the crate
/// logs at `debug` level and `RUST_LOG` may override; otherwise everything is
/// pinned to `info` so a stray environment variable cannot flood the console.
pub fn init(debug: bool) {
    let default = if debug { "info,tradedeck=debug" } else { "info" };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    } else {
        EnvFilter::new(default)
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
