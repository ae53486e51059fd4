//! File-edit sessions: shared-store records, lifecycle and idle sweep.

mod manager;
mod registry;
mod sweeper;

pub use manager::{SessionDeps, SessionManager};
pub use registry::{SessionRegistry, SESSION_PREFIX};
pub use sweeper::SessionSweeper;
