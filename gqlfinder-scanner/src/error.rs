use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Property access failed: {0}")]
    PropertyAccess(String),

    #[error("Script injection failed: {0}")]
    Injection(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
