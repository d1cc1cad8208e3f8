use std::fmt;

/// Error types for parameter setup and minimizer preconditions
#[derive(Debug, PartialEq)]
pub enum MinimizerError {
    IndexOutOfRange(usize),
    InvalidLimits(String),
    InvalidParameters(String),
    InvalidStepSize,
    InvalidTolerance,
    NoFreeParameters,
    NotInitialized(usize),
    TooManyParameters(usize),
}

impl fmt::Display for MinimizerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MinimizerError::IndexOutOfRange(idx) => {
                write!(f, "Parameter index {} out of range", idx)
            }
            MinimizerError::InvalidLimits(msg) => write!(f, "Invalid limits: {}", msg),
            MinimizerError::InvalidParameters(msg) => {
                write!(f, "Invalid parameters: {}", msg)
            }
            MinimizerError::InvalidStepSize => {
                write!(f, "Step size must be positive and finite")
            }
            MinimizerError::InvalidTolerance => write!(f, "Tolerance must be positive"),
            MinimizerError::NoFreeParameters => {
                write!(f, "At least one free parameter is required")
            }
            MinimizerError::NotInitialized(idx) => {
                write!(f, "Parameter {} has not been initialized", idx)
            }
            MinimizerError::TooManyParameters(max) => {
                write!(f, "Parameter set supports at most {} parameters", max)
            }
        }
    }
}

impl std::error::Error for MinimizerError {}
