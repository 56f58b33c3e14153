use thiserror::Error;

/// Main error type for the RankTune system
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Surrogate error: {0}")]
    Surrogate(#[from] SurrogateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("The ranking model was not fit yet")]
    NotFitted,

    #[error("No trials were recorded by the optimizer")]
    NoTrials,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Dataset and splitting errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Empty dataset: {message}")]
    Empty { message: String },

    #[error("Shape mismatch: {message}")]
    ShapeMismatch { message: String },

    #[error("Features and labels disagree on group {key}")]
    GroupMismatch { key: usize },

    #[error("Expected {expected} input, got {actual} input")]
    VariantMismatch { expected: String, actual: String },

    #[error("Invalid split: {message}")]
    InvalidSplit { message: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },
}

/// Errors raised by rankers and tunable components
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model fitting failed: {message}")]
    FitFailed { message: String },

    #[error("Prediction failed: {message}")]
    PredictionFailed { message: String },

    #[error("Parameter error: {parameter}, message: {message}")]
    ParameterError { parameter: String, message: String },

    #[error("Ranker {ranker} exposes no tunable component named {component}")]
    UnknownComponent { ranker: String, component: String },
}

/// Errors raised by the surrogate optimizer
#[derive(Error, Debug)]
pub enum SurrogateError {
    #[error("Invalid dimension {index}: {message}")]
    InvalidDimension { index: usize, message: String },

    #[error("Point has {actual} dimensions, the space has {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid observation: {message}")]
    InvalidObservation { message: String },

    #[error("Gaussian process fit failed: {message}")]
    FitFailed { message: String },
}

/// Result type alias for RankTune operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Config(format!($($arg)*))
    };
}
