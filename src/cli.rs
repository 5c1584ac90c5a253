use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "repomirror", about = "Caching mirror proxy for a remote artifact repository")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./repomirror.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port to listen on; overrides the port of `listen` from the configuration.
    #[arg(long, env = "REPOMIRROR_PORT")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
