//! Command-line argument definitions (clap).

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "dcm-collector")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "IPMI platform telemetry collector (power, thermal, health, inventory)", long_about = None)]
pub struct Args {
    /// Path to config.json (default: next to the executable)
    #[arg(short = 'c', long)]
    pub config: Option<String>,

    /// Run a single collection cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Print the metric catalog and exit
    #[arg(long)]
    pub metrics: bool,

    /// Set log level (TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL)
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

/// Map a user-facing level name to a tracing filter. `None` for unknown names.
pub fn filter_for(level: &str) -> Option<&'static str> {
    match level.to_lowercase().as_str() {
        "critical" => Some("error"), // CRITICAL maps to ERROR level
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::parse_from(["dcm-collector", "--config", "/etc/dcm.json", "--once", "--log-level", "DEBUG"]);
        assert_eq!(args.config.as_deref(), Some("/etc/dcm.json"));
        assert!(args.once);
        assert!(!args.metrics);
        assert_eq!(filter_for(args.log_level.as_deref().unwrap()), Some("debug"));
    }

    #[test]
    fn critical_maps_to_error() {
        assert_eq!(filter_for("CRITICAL"), Some("error"));
        assert_eq!(filter_for("verbose"), None);
    }
}
