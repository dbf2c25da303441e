#![forbid(unsafe_code)]

pub mod assignment_status;
pub mod config;
pub mod error;
pub mod progress;

pub use course_core::Clock;

pub use assignment_status::AssignmentStatusService;
pub use config::SessionConfig;
pub use error::{AssignmentStatusError, SessionError};
pub use progress::{CloseTrigger, ProgressSession, ProgressSessionService, SessionState};
