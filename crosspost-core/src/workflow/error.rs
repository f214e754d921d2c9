use std::time::Duration;

use thiserror::Error;

use crate::browser::BrowserError;
use crate::fetcher::FetchError;

/// Why a workflow state failed. Every variant is fatal to the run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("asset fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("browser session could not start: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("element interaction failed: {0}")]
    Interaction(String),
    #[error("authentication failed; still on sign-in page {url}")]
    AuthenticationFailed { url: String },
    #[error("upload processing did not finish within {0:?}")]
    ProcessingTimeout(Duration),
    #[error("publish could not be confirmed: {0}")]
    VerificationFailed(String),
    #[error("workflow cancelled: {0}")]
    Cancelled(String),
}

impl From<BrowserError> for WorkflowError {
    fn from(error: BrowserError) -> Self {
        match error {
            BrowserError::Launch(message) => WorkflowError::Launch(message),
            BrowserError::Navigation(message) => WorkflowError::Navigation(message),
            BrowserError::ElementNotFound(message) => WorkflowError::ElementNotFound(message),
            BrowserError::Interaction(message) => WorkflowError::Interaction(message),
            other => WorkflowError::Interaction(other.to_string()),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
