use thiserror::Error;

/// Errors raised by fitting, projection and sampling operations.
///
/// These are programming or data-quality errors, not transient faults:
/// no operation retries internally, and a failed `fit` leaves any prior
/// fitted state untouched.
#[derive(Debug, Error)]
pub enum Error {
    /// The input data cannot support the requested computation, for example
    /// fewer rows than features, zero total variance, or a covariance that
    /// stays singular after regularization.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// An operation that requires fitted state was called before `fit`.
    #[error("model has not been fitted yet")]
    NotFitted,

    /// The input shape disagrees with the fitted state or declared columns.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A configuration or call parameter is out of its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;
