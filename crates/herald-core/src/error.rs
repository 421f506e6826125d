use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeraldError {
    /// Short error code string, matching the codes the HTTP layer emits.
    pub fn code(&self) -> &'static str {
        match self {
            HeraldError::Config(_) => "CONFIG_ERROR",
            HeraldError::UnknownTimezone(_) => "CONFIG_ERROR",
            HeraldError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, HeraldError>;
