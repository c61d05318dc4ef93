use std::result::Result as StdResult;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Validation finished with a non-empty error list and the caller gave
    /// the engine no collector to leave it in.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = StdResult<T, Error>;
