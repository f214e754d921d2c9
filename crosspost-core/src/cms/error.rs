use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PostError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("cms answered with http status {code}: {body}")]
    HttpStatus { code: u16, body: String },
    #[error("cms configuration error: {0}")]
    Config(String),
}

pub type PostResult<T> = Result<T, PostError>;
