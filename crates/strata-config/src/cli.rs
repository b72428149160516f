//! Command-line argument parsing for the server binary.

use std::path::PathBuf;

use clap::Parser;

use crate::ServerSettings;

/// Strata server command-line arguments.
///
/// CLI values override settings loaded from `server.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "strata-server", about = "Authoritative voxel game server")]
pub struct CliArgs {
    /// Directory holding `server.ron` and the voxel catalogue.
    #[arg(long, default_value = ".")]
    pub config: PathBuf,

    /// Bind address.
    #[arg(long)]
    pub ip: Option<String>,

    /// Listen port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Simulation ticks per second.
    #[arg(long)]
    pub tps: Option<u32>,

    /// Maximum concurrent connections.
    #[arg(long)]
    pub max_connections: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Also write JSON logs into this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl ServerSettings {
    /// Apply CLI overrides to loaded settings.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref ip) = args.ip {
            self.ip = ip.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(tps) = args.tps {
            self.tps = tps;
        }
        if let Some(max) = args.max_connections {
            self.max_connections = max;
        }
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut settings = ServerSettings::default();
        let args = CliArgs {
            port: Some(4000),
            ip: Some("0.0.0.0".to_string()),
            ..CliArgs::default()
        };
        settings.apply_cli_overrides(&args);
        assert_eq!(settings.port, 4000);
        assert_eq!(settings.ip, "0.0.0.0");
        assert_eq!(settings.tps, 32);
    }

    #[test]
    fn test_cli_no_override() {
        let mut settings = ServerSettings::default();
        settings.apply_cli_overrides(&CliArgs::default());
        assert_eq!(settings, ServerSettings::default());
    }

    #[test]
    fn test_parse_args() {
        let args =
            CliArgs::try_parse_from(["strata-server", "--port", "1234", "--tps", "20"]).unwrap();
        assert_eq!(args.port, Some(1234));
        assert_eq!(args.tps, Some(20));
        assert_eq!(args.config, PathBuf::from("."));
    }
}
