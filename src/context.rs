//! Explicit construction-time context, threaded through by hand instead of
//! relying on implicit global state.

use std::sync::Arc;

use crate::config::CoreConfig;
use crate::ids::BooidGenerator;
use crate::pty::PtyManager;

/// Shared handles needed to spin up a session: configuration, the local
/// Booid generator (one per process), and the stateless PTY manager.
///
/// `CoreContext` carries only what's needed *before* a session exists; it
/// is not a live session registry. The session registry itself is the
/// caller's problem — keeping it out of this struct means constructing a
/// `CoreContext` has no side effects and needs no interior mutability.
pub struct CoreContext {
    pub config: CoreConfig,
    pub ids: Arc<BooidGenerator>,
    pub pty: PtyManager,
}

impl CoreContext {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            ids: Arc::new(BooidGenerator::with_hostname_machine_id()),
            pty: PtyManager::new(),
        }
    }

    /// Load configuration from disk (or defaults) and build a context from it.
    pub fn load() -> Self {
        Self::new(CoreConfig::load())
    }
}
