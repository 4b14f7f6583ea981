use tracing::Level;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

/// Set up a global tracing subscriber, once per test binary. `RUST_LOG`
/// overrides the default filter.
pub(crate) fn setup_tracing() {
    let targets = if let Ok(rust_log) = std::env::var("RUST_LOG") {
        rust_log.parse::<Targets>().unwrap()
    } else {
        Targets::new()
            .with_default(Level::INFO)
            .with_target("weft_quota", Level::DEBUG)
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_file(false)
        .with_line_number(false)
        .with_test_writer();

    // tests share the process: only the first one gets to install it
    let _ = tracing_subscriber::registry()
        .with(targets)
        .with(fmt_layer)
        .try_init();
}
