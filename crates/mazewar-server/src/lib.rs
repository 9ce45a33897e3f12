//! mazewar-server — the concurrent game core: player registry, client
//! registry, per-connection service routine, and server lifecycle, plus
//! the ambient stack (logging, configuration, CLI, maze templates).

pub mod config;
pub mod logging;
pub mod player;
pub mod registry;
pub mod server;
pub mod service;
pub mod template;
