use thiserror::Error;

use crate::cache::CacheError;

/// Why a detection attempt did not produce a version
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No strategy available for {0}")]
    NoStrategy(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DetectionError {
    /// Collaborator I/O failures and unparseable content are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Parse(_))
    }
}

/// Failure to assemble the detection pipeline from configuration
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Cache setup failed: {0}")]
    Cache(#[from] CacheError),

    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid version pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DetectionError::Fetch("down".into()), true)]
    #[case(DetectionError::Parse("no version".into()), true)]
    #[case(DetectionError::Validation("empty name".into()), false)]
    #[case(DetectionError::NoStrategy("x".into()), false)]
    #[case(DetectionError::Timeout(10), false)]
    #[case(DetectionError::Internal("panic".into()), false)]
    fn is_retryable_returns_expected(#[case] error: DetectionError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn display_includes_kind_and_detail() {
        assert_eq!(
            DetectionError::Fetch("connection refused".into()).to_string(),
            "Fetch error: connection refused"
        );
    }
}
