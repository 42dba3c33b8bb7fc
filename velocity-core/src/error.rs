//! Error types for velocity operations

#[derive(Debug, thiserror::Error)]
pub enum VelocityError {
    /// Bad or missing settings, including a malformed credential payload.
    /// Raised while building the warehouse client and never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The warehouse could not be reached or the query failed there.
    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Invalid request: {0}")]
    Request(String),

    /// Non-success reply from a velocity-service instance.
    #[error("Service error [{status}]: {message}")]
    Service { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VelocityError {
    pub fn data_source(msg: impl std::fmt::Display) -> Self {
        Self::DataSource(msg.to_string())
    }

    pub fn configuration(msg: impl std::fmt::Display) -> Self {
        Self::Configuration(msg.to_string())
    }
}

impl From<reqwest::Error> for VelocityError {
    fn from(err: reqwest::Error) -> Self {
        Self::DataSource(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_name_their_kind() {
        let err = VelocityError::configuration("missing project id");
        assert!(matches!(err, VelocityError::Configuration(_)));
        assert_eq!(err.to_string(), "Configuration error: missing project id");
    }

    #[test]
    fn messages_carry_context() {
        let err = VelocityError::data_source("connection refused");
        assert_eq!(err.to_string(), "Data source error: connection refused");
    }
}
