use thiserror::Error;

#[derive(Error, Debug)]
pub enum NilError {
    /// A scalar parameter is outside [0, 1] or not finite
    #[error("parameter `{name}` must be a probability in [0, 1], got {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("expected state frequencies must satisfy f1 + f2 <= 1, got f1 = {f1}, f2 = {f2}")]
    InconsistentFrequencies { f1: f64, f2: f64 },

    /// Recombination mass leaving `state` has nowhere to go
    #[error("cannot split recombination rate out of state {state}: both destination frequencies are zero")]
    DegenerateTransition { state: usize },

    #[error("marker grouping does not partition the genotype columns: {message}")]
    Coverage { message: String },

    #[error("shape mismatch: {message}")]
    Shape { message: String },

    #[error("genotype at individual {row}, marker {col} is {value}; expected 0, 1, 2 or 3")]
    InvalidGenotype { row: usize, col: usize, value: u8 },

    /// A call matrix cell that is not one of the three ancestry states
    #[error("call at individual {row}, marker {col} is {value}; expected 0, 1 or 2")]
    InvalidCall { row: usize, col: usize, value: u8 },

    #[error("{group} group index {index} is out of range for {n_individuals} individuals")]
    GroupIndex {
        group: &'static str,
        index: usize,
        n_individuals: usize,
    },

    #[error("no candidate values given for `{name}`")]
    EmptyGrid { name: &'static str },

    #[error("unknown selection criterion `{0}` (expected donor-rate-max, het-rate-max or balanced)")]
    UnknownCriterion(String),

    #[error("unknown coverage level `{0}` (expected low, medium or high)")]
    UnknownCoverage(String),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NilError>;

impl NilError {
    pub fn coverage(message: impl Into<String>) -> Self {
        NilError::Coverage {
            message: message.into(),
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        NilError::Shape {
            message: message.into(),
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        NilError::Parse {
            line,
            message: message.into(),
        }
    }

    /// True for errors caused by the parameter values themselves. A grid
    /// search records these as skipped combinations.
    pub fn is_configuration(&self) -> bool {
        match self {
            NilError::InvalidParameter { .. }
            | NilError::InconsistentFrequencies { .. }
            | NilError::DegenerateTransition { .. }
            | NilError::EmptyGrid { .. }
            | NilError::UnknownCriterion(_)
            | NilError::UnknownCoverage(_) => true,
            _ => false,
        }
    }
}
