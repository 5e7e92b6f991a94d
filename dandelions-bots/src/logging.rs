//! Tracing setup shared by the binaries.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// JSON output when `DANDELIONS_LOG_JSON=1`, human-readable otherwise.
/// `directives` (e.g. `dandelions_bots=info`) are added on top of `RUST_LOG`.
pub fn init_tracing(directives: &[&str]) -> Result<()> {
    let json_logs = std::env::var("DANDELIONS_LOG_JSON").unwrap_or_default() == "1";
    let mut filter = EnvFilter::from_default_env();
    for d in directives {
        filter = filter.add_directive(d.parse()?);
    }
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
