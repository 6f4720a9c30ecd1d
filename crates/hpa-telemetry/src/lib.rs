//! Logging initialization: one `tracing_subscriber` layer, its level
//! resolved from the `LOG_LEVEL` environment variable and adjusted by the
//! CLI's `--verbose`/`--quiet` flags.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// The environment variable consulted for a default log level when neither
/// `--verbose` nor `--quiet` is given.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Parses the on-disk enum `LOG_LEVEL` uses (`error|warning|verbose|info|debug`)
/// onto the nearest `tracing::Level`. `verbose` sits between `info` and
/// `debug` in the source vocabulary, so it maps to `debug`.
fn parse_log_level(raw: &str) -> Option<tracing::Level> {
    match raw.to_ascii_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warning" => Some(tracing::Level::WARN),
        "verbose" => Some(tracing::Level::DEBUG),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        _ => None,
    }
}

/// Resolves the effective `tracing` level from `LOG_LEVEL` and the CLI's
/// verbosity flags. `verbose` and `quiet` each shift the base level one
/// step; simultaneous `--verbose --quiet` cancels out.
#[must_use]
pub fn resolve_level(verbose: bool, quiet: bool) -> tracing::Level {
    let base = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|s| parse_log_level(&s))
        .unwrap_or(tracing::Level::INFO);

    match (verbose, quiet) {
        (true, false) => step(base, 1),
        (false, true) => step(base, -1),
        _ => base,
    }
}

fn step(level: tracing::Level, delta: i8) -> tracing::Level {
    const ORDER: [tracing::Level; 5] = [
        tracing::Level::ERROR,
        tracing::Level::WARN,
        tracing::Level::INFO,
        tracing::Level::DEBUG,
        tracing::Level::TRACE,
    ];
    let idx = ORDER.iter().position(|&l| l == level).unwrap_or(2) as i8;
    let next = (idx + delta).clamp(0, ORDER.len() as i8 - 1);
    ORDER[next as usize]
}

/// Installs a global `tracing` subscriber writing to stderr at the level
/// [`resolve_level`] computes. Call once, at process startup.
pub fn init(verbose: bool, quiet: bool) {
    let level = resolve_level(verbose, quiet);
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(unsafe_code)]
    fn clear_log_level_env() {
        unsafe {
            std::env::remove_var(LOG_LEVEL_ENV);
        }
    }

    #[test]
    fn verbose_and_quiet_cancel_out() {
        clear_log_level_env();
        assert_eq!(resolve_level(true, true), tracing::Level::INFO);
    }

    #[test]
    fn verbose_steps_toward_trace() {
        clear_log_level_env();
        assert_eq!(resolve_level(true, false), tracing::Level::DEBUG);
    }

    #[test]
    fn quiet_steps_toward_error() {
        clear_log_level_env();
        assert_eq!(resolve_level(false, true), tracing::Level::WARN);
    }

    #[test]
    fn parses_the_five_level_enum() {
        assert_eq!(parse_log_level("error"), Some(tracing::Level::ERROR));
        assert_eq!(parse_log_level("warning"), Some(tracing::Level::WARN));
        assert_eq!(parse_log_level("verbose"), Some(tracing::Level::DEBUG));
        assert_eq!(parse_log_level("info"), Some(tracing::Level::INFO));
        assert_eq!(parse_log_level("debug"), Some(tracing::Level::DEBUG));
        assert_eq!(parse_log_level("nonsense"), None);
    }
}
