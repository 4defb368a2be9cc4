//! Error types for decentralized k-means.

use thiserror::Error;

/// Errors raised by partitioning, local optimization, aggregation and the
/// phase protocol. None of them are retried; any error ends the run.
#[derive(Error, Debug)]
pub enum DkmError {
    /// Invalid k, site count, epsilon, learning rate or data shape
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Phase message missing a field its phase requires
    #[error("validation error in phase '{phase}': missing or invalid field '{field}'")]
    Validation { phase: String, field: String },

    /// An update produced a non-finite centroid
    #[error("numeric error: {0}")]
    Numeric(String),

    /// Phase tag with no handler
    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    /// Round loop hit its cap without every site converging
    #[error("no global convergence after {max_rounds} rounds")]
    RoundLimitExceeded { max_rounds: usize },

    /// A round did not complete in time (message-driven deployments)
    #[error("round {round} timed out")]
    Timeout { round: usize },

    /// Failure of a single site, which aborts the whole round
    #[error("site {site} failed: {source}")]
    Site {
        site: usize,
        #[source]
        source: Box<DkmError>,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DkmError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        DkmError::Configuration(msg.into())
    }

    pub(crate) fn missing(phase: impl Into<String>, field: impl Into<String>) -> Self {
        DkmError::Validation {
            phase: phase.into(),
            field: field.into(),
        }
    }

    pub(crate) fn at_site(site: usize, err: DkmError) -> Self {
        match err {
            DkmError::Site { .. } => err,
            other => DkmError::Site {
                site,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, unwrapping site attribution.
    pub fn root(&self) -> &DkmError {
        match self {
            DkmError::Site { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the caller may reasonably retry the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.root(), DkmError::Timeout { .. })
    }
}

/// Result type alias using [`DkmError`].
pub type Result<T> = std::result::Result<T, DkmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_errors_do_not_nest() {
        let inner = DkmError::Numeric("nan".into());
        let once = DkmError::at_site(1, inner);
        let twice = DkmError::at_site(2, once);
        match twice {
            DkmError::Site { site, ref source } => {
                assert_eq!(site, 1);
                assert!(matches!(**source, DkmError::Numeric(_)));
            }
            other => panic!("expected site error, got {other:?}"),
        }
    }

    #[test]
    fn only_timeouts_are_recoverable() {
        assert!(DkmError::Timeout { round: 3 }.is_recoverable());
        assert!(DkmError::at_site(0, DkmError::Timeout { round: 1 }).is_recoverable());
        assert!(!DkmError::UnknownPhase("x".into()).is_recoverable());
        assert!(!DkmError::RoundLimitExceeded { max_rounds: 5 }.is_recoverable());
    }

    #[test]
    fn validation_message_names_field() {
        let err = DkmError::missing("remote_init_centroids", "remote_centroids");
        assert!(err.to_string().contains("remote_centroids"));
    }
}
