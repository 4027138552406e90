//! Tracing subscriber setup for processes embedding the bridge.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `callbridge={level},warn` is used.
/// Calling this more than once (e.g. from several tests) is harmless: later
/// calls leave the first subscriber in place and return `false`.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init()
        .is_ok()
}

fn default_directive(level: &str) -> String {
    format!("callbridge={level},warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_scopes_crate_level() {
        assert_eq!(default_directive("debug"), "callbridge=debug,warn");
    }

    #[test]
    fn second_init_does_not_panic() {
        let _ = init("info");
        assert!(!init("debug"));
    }
}
