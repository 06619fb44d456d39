use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

pub fn parse() -> Args {
    Args::parse()
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Azure Cost Exporter, exposing Azure cost data as Prometheus metrics.",
    long_about = None
)]
pub struct Args {
    /// The config file (exporter_config.yaml) for the exporter
    #[arg(long, short = 'c')]
    pub config: PathBuf,
    /// Logging level to be used
    #[arg(value_enum, long, short = 'l', ignore_case = true, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Critical | LogLevel::Error => LevelFilter::Error,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
        }
    }
}
