//! GPU-cell-ready VT terminal emulation core.
//!
//! This crate owns the parser/screen/scrollback model, the PTY/IO thread
//! pipeline, and the per-frame GPU cell builder. It has no window, no GUI
//! event loop, and no graphics backend of its own — callers drive a
//! [`PtyManager`] to spawn sessions, drain [`mailbox::Mailbox`] queues for
//! events, and feed [`render::cell_builder::CellBuilder`] snapshots to
//! whatever renderer they have.

pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod mailbox;
pub mod parser;
pub mod pty;
pub mod render;
pub mod shell;
pub mod terminal;

pub use config::CoreConfig;
pub use context::CoreContext;
pub use error::{CoreError, CoreResult};
pub use ids::{Booid, BooidGenerator};
pub use pty::{PtyManager, Session};

/// Initialize the crate's tracing subscriber. Callers embedding this core
/// into a larger application (with their own subscriber) should skip this
/// and call `tracing_subscriber::fmt()` themselves instead.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "vtcore=info".into()))
        .try_init();
}
