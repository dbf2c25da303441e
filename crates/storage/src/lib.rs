#![forbid(unsafe_code)]

pub mod http;
pub mod repository;
pub mod sqlite;

pub use repository::{
    AssignmentRepository, InMemoryRepository, ProgressRepository, QuestionRepository, Storage,
    StorageError,
};
