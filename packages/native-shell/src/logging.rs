use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the process-wide tracing subscriber.
///
/// JSON lines go to stderr. `RUST_LOG` adds directives on top of the
/// default `native_shell=info` (or `native_shell=error` when `quiet`).
/// Calling this twice is harmless; the second install is ignored.
pub fn init_logging(quiet: bool) {
    let directive = if quiet {
        "native_shell=error"
    } else {
        "native_shell=info"
    };

    let filter = match directive.parse() {
        Ok(d) => EnvFilter::from_default_env().add_directive(d),
        Err(_) => EnvFilter::from_default_env(),
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(filter)
        .try_init();
}
