use thiserror::Error;

use crate::model::ProgressError;
use crate::time::TimeParseError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    TimeParse(#[from] TimeParseError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
}
