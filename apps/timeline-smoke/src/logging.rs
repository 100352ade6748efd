//! Tracing setup for the smoke binary.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info,timeline_smoke=debug,timeline_runtime=debug";

/// App-specific filter variables, checked after `RUST_LOG` in this order.
const FILTER_VARS: [&str; 2] = ["TIMELINE_SMOKE_LOG", "TIMELINE_LOG"];

/// Install the global subscriber.
///
/// `RUST_LOG` wins, then `TIMELINE_SMOKE_LOG`, then `TIMELINE_LOG`. A variable
/// that is blank or does not parse as a filter is skipped.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| app_filter(|key| env::var(key).ok()));
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(filter)
        .try_init();
}

fn app_filter<F>(lookup: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    FILTER_VARS
        .iter()
        .filter_map(|key| lookup(key))
        .filter(|directives| !directives.trim().is_empty())
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_for(pairs: &[(&str, &str)]) -> String {
        app_filter(|key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_owned())
        })
        .to_string()
    }

    fn rendered(directives: &str) -> String {
        EnvFilter::new(directives).to_string()
    }

    #[test]
    fn falls_back_to_default_directives() {
        assert_eq!(filter_for(&[]), rendered(DEFAULT_DIRECTIVES));
    }

    #[test]
    fn smoke_variable_wins_over_shared_one() {
        let filter = filter_for(&[("TIMELINE_LOG", "warn"), ("TIMELINE_SMOKE_LOG", "trace")]);
        assert_eq!(filter, rendered("trace"));
    }

    #[test]
    fn blank_or_invalid_values_are_skipped() {
        let filter = filter_for(&[("TIMELINE_SMOKE_LOG", "  "), ("TIMELINE_LOG", "error")]);
        assert_eq!(filter, rendered("error"));

        let filter = filter_for(&[
            ("TIMELINE_SMOKE_LOG", "timeline=loud"),
            ("TIMELINE_LOG", "debug"),
        ]);
        assert_eq!(filter, rendered("debug"));
    }
}
