mod assignment;
mod ids;
mod progress;
mod question;

pub use ids::{AssignmentId, CourseId, ParseIdError, QuestionId, UserId};

pub use assignment::Assignment;
pub use progress::{Answers, ProgressError, ProgressRecord, ProgressUpdate, clamp_question_index};
pub use question::Question;
