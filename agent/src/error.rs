use thiserror::Error;

/// Failures that can end a single poll cycle. None of them stop the agent.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("token acquisition failed: {0}")]
    Acquisition(String),

    #[error("fetching events failed: {0}")]
    Fetch(String),

    #[error("sending mail failed: {0}")]
    Dispatch(String),

    #[error("baseline persistence failed: {0}")]
    Persistence(String),
}

impl From<reqwest::Error> for CycleError {
    fn from(e: reqwest::Error) -> Self {
        CycleError::Fetch(e.to_string())
    }
}

impl From<std::io::Error> for CycleError {
    fn from(e: std::io::Error) -> Self {
        CycleError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for CycleError {
    fn from(e: serde_json::Error) -> Self {
        CycleError::Persistence(e.to_string())
    }
}

pub type CycleResult<T> = std::result::Result<T, CycleError>;
