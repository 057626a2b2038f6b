use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigOverrides;
use crate::simulate::SimulationSettings;

#[derive(Parser, Debug)]
#[command(name = "smogwatch-bridge")]
#[command(
    author,
    version,
    about = "Air quality alerting bridge between MQTT and a windowed rule engine"
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "smogwatch.yaml")]
    pub config: PathBuf,

    /// Broker host, overrides the configuration
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Broker port, overrides the configuration
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the bridge until interrupted (default)
    Run,

    /// Publish random station readings to the inbound topics
    Simulate {
        /// Number of rounds to publish
        #[arg(short, long, default_value = "50")]
        rounds: u32,

        /// Milliseconds between rounds
        #[arg(short, long, default_value = "2000")]
        interval_ms: u64,

        /// Station identifiers (comma-separated)
        #[arg(short, long, value_delimiter = ',', default_value = "A1,A2,A3,A4,A5,A6")]
        stations: Vec<String>,
    },
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}

impl Commands {
    /// Simulation parameters, if this is the simulate command
    pub fn simulation(&self) -> Option<SimulationSettings> {
        match self {
            Commands::Simulate {
                rounds,
                interval_ms,
                stations,
            } => Some(SimulationSettings {
                stations: stations.clone(),
                interval: Duration::from_millis(*interval_ms),
                rounds: *rounds,
            }),
            Commands::Run => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["smogwatch-bridge"]).unwrap();
        assert_eq!(cli.command(), Commands::Run);
        assert_eq!(cli.config, PathBuf::from("smogwatch.yaml"));
        assert!(cli.overrides().host.is_none());
    }

    #[test]
    fn test_simulate_arguments() {
        let cli = Cli::try_parse_from([
            "smogwatch-bridge",
            "simulate",
            "--rounds",
            "3",
            "--stations",
            "B1,B2",
            "--port",
            "1884",
        ])
        .unwrap();

        let settings = cli.command().simulation().unwrap();
        assert_eq!(settings.rounds, 3);
        assert_eq!(settings.interval, Duration::from_secs(2));
        assert_eq!(settings.stations, vec!["B1", "B2"]);
        assert_eq!(cli.overrides().port, Some(1884));
    }
}
