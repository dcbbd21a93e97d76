use thiserror::Error;

#[derive(Error, Debug)]
pub enum RideWatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl RideWatchError {
    /// Stable error code for log dashboards. Codes never change once shipped.
    pub fn code(&self) -> &'static str {
        match self {
            RideWatchError::Config(_) => "config",
            RideWatchError::Validation(_) => "validation",
            RideWatchError::Repository(_) => "repository",
            RideWatchError::Cancelled => "cancelled",
            RideWatchError::Anyhow(_) => "internal",
        }
    }
}
