use thiserror::Error;

/// Enum of the possible error variants that may be encountered during quality control.
///
/// Every variant is scoped to the smallest unit that failed (a rain cell or a radial); the
/// pipeline records it and moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QcError {
    /// A rain cell is too short for the 5-point operators
    #[error("segment of {len} gates is shorter than the minimum of {min}")]
    SegmentTooShort { len: usize, min: usize },

    /// The linear program for a rain cell did not reach an optimal solution
    #[error("{0}")]
    ReconstructionFailure(String),

    /// The attenuation coefficient could not be fitted within its bounds
    #[error("{0}")]
    AttenuationFitFailure(String),

    /// The spline normal equations could not be solved
    #[error("{0}")]
    SingularSystem(String),

    /// Input arrays are inconsistent with each other
    #[error("{0}")]
    InvalidInput(String),
}

#[cfg(feature = "python")]
impl From<QcError> for pyo3::PyErr {
    fn from(value: QcError) -> Self {
        let msg = value.to_string();
        pyo3::exceptions::PyValueError::new_err(msg)
    }
}
