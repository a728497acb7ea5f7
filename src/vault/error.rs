#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("HTTP status {0}: {1}")]
    HttpStatus(u16, String),

    #[error("Invalid resource id: {0}")]
    InvalidId(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Error from reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl VaultError {
    /// Failures worth repeating unchanged: refused or timed out connections,
    /// server-side errors, rate limiting and 412 returned while a performance
    /// standby catches up. A request reqwest could not even build is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            VaultError::Reqwest(e) => e.is_timeout() || e.is_connect(),
            VaultError::HttpStatus(status, _) => {
                *status >= 500 || *status == 429 || *status == 412
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::HttpStatus(404, _))
    }
}
