use tracing_subscriber::EnvFilter;

const CRATE_TARGET: &str = "catchment_calibration";

fn level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install a formatting subscriber for this crate's events.
///
/// Mapping:
/// - 0 -> warn
/// - 1 -> info (run milestones, printed objective values)
/// - 2 -> debug (rejected candidates)
/// - 3+ -> trace
///
/// `RUST_LOG` overrides the verbosity if set. Calling it again after a
/// subscriber is installed does nothing.
pub fn init(verbosity: u8) {
    let default_filter = format!("{CRATE_TARGET}={}", level(verbosity));
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level(0), "warn");
        assert_eq!(level(2), "debug");
        assert_eq!(level(9), "trace");
    }

    #[test]
    fn init_twice_is_harmless() {
        init(1);
        init(2);
    }
}
