//! Process-wide tracing setup for the syncwire binary.
//!
//! Connector stdout LOG traffic is re-emitted through `tracing` with a
//! `connector` field, so one subscriber carries both engine and connector
//! output. `RUST_LOG` overrides the CLI level entirely and can scope
//! crates individually, e.g. `RUST_LOG=syncwire_protocol=debug`.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber at `level`, honoring `RUST_LOG` when set.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Sentinel watching makes the `notify` crate chatty below warn; pin it
/// there unless `RUST_LOG` says otherwise.
fn default_directives(level: &str) -> String {
    format!("{level},notify=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse_as_a_filter() {
        for level in ["error", "warn", "info", "debug", "trace"] {
            assert!(EnvFilter::try_new(default_directives(level)).is_ok());
        }
    }
}
