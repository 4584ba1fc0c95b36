use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// An external platform was unreachable or answered with a payload we could not use.
    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// An extraction run could not be started or was aborted before reporting.
    #[error("extraction task failed: {0}")]
    Task(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TrackerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrackerError::NotFound(_))
    }
}

impl From<sqlx::Error> for TrackerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => TrackerError::NotFound("row not found".to_string()),
            other => TrackerError::Persistence(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        TrackerError::ExternalService(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: TrackerError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn other_sqlx_errors_are_persistence_failures() {
        let err: TrackerError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, TrackerError::Persistence(_)));
    }
}
