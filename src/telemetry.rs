//! Tracing initialization for the binary.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Verbosity comes from repeated `-v` flags; `NEXTGALLERY_LOG` overrides with
/// full `EnvFilter` syntax. Safe to call more than once (later calls no-op),
/// which keeps test binaries happy.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_directive(verbosity, quiet).into())
        .with_env_var("NEXTGALLERY_LOG")
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn level_directive(verbosity: u8, quiet: bool) -> tracing::level_filters::LevelFilter {
    use tracing::level_filters::LevelFilter;
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn quiet_wins_over_verbosity() {
        assert_eq!(level_directive(3, true), LevelFilter::ERROR);
    }

    #[test]
    fn verbosity_ladder() {
        assert_eq!(level_directive(0, false), LevelFilter::WARN);
        assert_eq!(level_directive(1, false), LevelFilter::INFO);
        assert_eq!(level_directive(2, false), LevelFilter::DEBUG);
        assert_eq!(level_directive(5, false), LevelFilter::TRACE);
    }
}
