//! Centralized diagnostic output.
//!
//! Every diagnostic funnels through `tracing` rather than scattered
//! `println!` calls, so connection threads, hit notifications, and protocol
//! errors show up as structured, filterable events rather than raw stdout
//! writes.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber. Call once from `main`.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mazewar=info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();
}
