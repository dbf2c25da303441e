mod autosave;
mod service;
mod session;

// Public API of the progress subsystem.
pub use crate::error::SessionError;
pub use service::ProgressSessionService;
pub use session::{CloseTrigger, ProgressSession, SessionState};
