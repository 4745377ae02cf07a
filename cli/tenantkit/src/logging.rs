//! Log setup for the CLI.
//!
//! Logs go to stderr so command output on stdout stays scriptable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "warn";
const VERBOSE_DIRECTIVE: &str = "info,tenantkit=debug,tenantkit_modules=debug";

/// Pick the filter directive: `RUST_LOG`, then the config filter, then the
/// verbosity flag.
fn select_directive(rust_log: Option<String>, config_filter: Option<&str>, verbose: bool) -> String {
    if let Some(directive) = rust_log.filter(|d| !d.trim().is_empty()) {
        return directive;
    }
    if let Some(filter) = config_filter.filter(|f| !f.trim().is_empty()) {
        return filter.to_string();
    }
    if verbose {
        VERBOSE_DIRECTIVE.to_string()
    } else {
        DEFAULT_DIRECTIVE.to_string()
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config_filter: Option<&str>, verbose: bool) {
    let directive = select_directive(std::env::var("RUST_LOG").ok(), config_filter, verbose);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("warning: invalid log filter '{directive}': {e}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    });

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_ansi(std::env::var_os("NO_COLOR").is_none()),
        )
        .with(filter)
        .try_init();
}
