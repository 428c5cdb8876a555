use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid executable image: {0}")]
    InvalidImage(String),

    #[error("Unsupported machine type: {0:#06x}")]
    UnsupportedMachine(u16),

    #[error("Unknown codepage: {0}")]
    UnknownCodepage(String),

    #[error("Cannot encode {text:?} in {codepage}")]
    Unencodable { codepage: String, text: String },

    #[error("Invalid patch plan: {0}")]
    InvalidPlan(String),

    #[error("PO syntax error at line {line}: {message}")]
    PoSyntax { line: usize, message: String },

    #[error("Progress channel closed unexpectedly")]
    ChannelClosed,

    #[error("A patch job is already running")]
    JobAlreadyRunning,

    #[error("Patch job panicked")]
    JobPanicked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Configuration errors are reported before any engine work starts
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::UnknownCodepage(_))
    }
}
