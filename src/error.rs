use thiserror::Error;

#[derive(Error, Debug)]
pub enum SymregError {
    #[error("Duplicate symbol name: '{0}' is already registered")]
    DuplicateName(String),

    #[error("Arity mismatch: {0}")]
    ArityMismatch(String),

    #[error("Invalid tree structure: {0}")]
    Structure(String),

    #[error("Compilation error: {0}")]
    Compilation(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

pub type Result<T> = std::result::Result<T, SymregError>;
