use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    /// Malformed or truncated engine output. Fatal for the whole report:
    /// nothing from the affected parse attempt is committed.
    #[error("corrupted report: {0}")]
    Corrupted(String),

    #[error("report io: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    pub fn corrupted(msg: impl Into<String>) -> Self {
        ParseError::Corrupted(msg.into())
    }
}
