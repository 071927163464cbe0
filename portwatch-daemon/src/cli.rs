//! CLI argument definitions for portwatch-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// portwatch port-filtering daemon.
///
/// Loads the frame engine, attaches it to one interface and logs every
/// captured frame that touches a watched port.
#[derive(Parser, Debug)]
#[command(name = "portwatch-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to portwatch.toml configuration file.
    #[arg(short, long, default_value = "/etc/portwatch/portwatch.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply CLI overrides on top of the file + environment configuration.
    pub fn apply_overrides(&self, config: &mut portwatch_core::PortwatchConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_etc() {
        let cli = DaemonCli::parse_from(["portwatch-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/portwatch/portwatch.toml"));
        assert!(!cli.validate);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn overrides_take_precedence() {
        let cli = DaemonCli::parse_from([
            "portwatch-daemon",
            "--config",
            "/tmp/pw.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--pid-file",
            "",
        ]);
        let mut config = portwatch_core::PortwatchConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert!(config.general.pid_file.is_empty());
    }
}
