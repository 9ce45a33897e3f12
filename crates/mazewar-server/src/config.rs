//! CLI parsing and the resolved server configuration:
//! `mazewar -p <port> [-t <template_path>]`.

use std::path::PathBuf;

use clap::Parser;

/// Real-time multi-player maze combat server.
#[derive(Debug, Parser)]
#[command(name = "mazewar")]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(short = 'p', long)]
    pub port: u16,

    /// Path to a maze template file (fixed-width rows of equal length).
    /// When omitted, a built-in default template is used.
    #[arg(short = 't', long)]
    pub template: Option<PathBuf>,
}

/// Fully resolved server configuration, independent of how it was sourced.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub template: Option<PathBuf>,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Config {
        Config {
            port: cli.port,
            template: cli.template,
        }
    }
}
