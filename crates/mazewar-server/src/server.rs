//! Server lifecycle — module init/teardown ordering and the accept loop.
//!
//! Init order: client registry → maze → player table. Teardown on the
//! graceful-stop signal: close the listening socket, `shutdown_all`,
//! `wait_for_empty`, then let `Drop` finalize the player table, maze, and
//! registry (their explicit `fini` counterparts).

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mazewar_common::maze::Maze;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::player::PlayerTable;
use crate::registry::ClientRegistry;
use crate::service;
use crate::template;

/// How long `accept()` blocks before re-checking the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid port: must be nonzero")]
    InvalidPort,
    #[error("failed to load maze template: {0}")]
    Template(#[from] crate::template::TemplateError),
    #[error("failed to initialize maze: {0}")]
    Maze(#[from] mazewar_common::maze::MazeError),
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
}

/// Process-wide game state, threaded through every operation rather than
/// kept as bare globals.
pub struct ServerContext {
    pub maze: Maze,
    pub players: PlayerTable,
    pub registry: ClientRegistry,
    pub shutdown: AtomicBool,
}

impl ServerContext {
    fn init(rows: &[String]) -> Result<ServerContext, ServerError> {
        // Init order: registry -> maze -> player table.
        let registry = ClientRegistry::new();
        let maze = Maze::init(rows)?;
        let players = PlayerTable::new();
        Ok(ServerContext {
            maze,
            players,
            registry,
            shutdown: AtomicBool::new(false),
        })
    }
}

/// Run the server until a graceful-stop signal is observed. Binds the
/// listening socket, spawns one thread per accepted connection, and on
/// shutdown runs the full teardown sequence.
pub fn run(cfg: Config) -> Result<(), ServerError> {
    if cfg.port == 0 {
        return Err(ServerError::InvalidPort);
    }
    let rows = template::load_template(cfg.template.as_deref())?;
    let ctx = Arc::new(ServerContext::init(&rows)?);

    let listener =
        TcpListener::bind(("0.0.0.0", cfg.port)).map_err(ServerError::Bind)?;
    listener
        .set_nonblocking(true)
        .map_err(ServerError::Bind)?;

    install_shutdown_hook(ctx.clone());

    info!(port = cfg.port, rows = rows.len(), "server listening");

    let mut handles = Vec::new();
    while !ctx.shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let conn_id = ctx.registry.next_id();
                info!(conn = conn_id, peer = %addr, "accepted connection");
                let conn_ctx = ctx.clone();
                let handle = thread::Builder::new()
                    .name(format!("conn-{conn_id}"))
                    .spawn(move || service::serve_connection(conn_ctx, conn_id, stream))
                    .expect("failed to spawn connection thread");
                handles.push(handle);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept() failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }

    shutdown(&ctx);
    for h in handles {
        let _ = h.join();
    }
    info!("server drained, exiting");
    Ok(())
}

/// Execute the teardown sequence: shut down every connection's read side,
/// then block until the registry has drained.
fn shutdown(ctx: &ServerContext) {
    info!("graceful stop requested, shutting down connections");
    ctx.registry.shutdown_all();
    ctx.registry.wait_for_empty();
}

/// Register SIGHUP/SIGINT/SIGTERM to flip the shutdown flag. SIGUSR1 (the
/// signal number historically used for laser-hit notification) is
/// intentionally never registered here: hit delivery is handled entirely
/// by polling an atomic flag, not by a signal handler.
fn install_shutdown_hook(ctx: Arc<ServerContext>) {
    for sig in [
        signal_hook::consts::SIGHUP,
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ] {
        let ctx = ctx.clone();
        // SAFETY: the handler only touches an AtomicBool, which is
        // async-signal-safe.
        unsafe {
            let _ = signal_hook::low_level::register(sig, move || {
                ctx.shutdown.store(true, Ordering::Relaxed);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_rejects_zero_port() {
        let cfg = Config {
            port: 0,
            template: None,
        };
        assert!(matches!(run(cfg), Err(ServerError::InvalidPort)));
    }
}
