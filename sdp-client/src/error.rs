use shared::ProtocolError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unlock parameters rejected before anything was dispatched
    #[error("invalid unlock request: {0}")]
    InvalidRequest(String),

    #[error("SPA dispatch failed: {0}")]
    SpaDispatchFailed(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed discovery response: {0}")]
    Decode(String),

    #[error("unknown service `{0}`")]
    UnknownService(String),

    #[error("service `{service}` offers no supported access type")]
    UnsupportedAccessType { service: String },

    #[error("client identity: {0}")]
    Identity(String),
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Decode(e.to_string())
    }
}
