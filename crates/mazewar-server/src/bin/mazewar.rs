//! Entry point: parse the CLI, initialize logging, and run the server
//! until a graceful-stop signal arrives. Exits 0 on graceful termination,
//! non-zero on bad arguments or maze-template failure.

use clap::Parser;

use mazewar_server::config::{Cli, Config};
use mazewar_server::{logging, server};

fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let cfg: Config = cli.into();

    if let Err(e) = server::run(cfg) {
        eprintln!("mazewar: {e}");
        std::process::exit(1);
    }
    Ok(())
}
