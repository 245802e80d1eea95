pub mod files;
pub mod store;

pub use store::{ClientDefinition, ClientIdentity, PolicyStore, ServicePolicy};

use shared::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("file not kind {expected} (found `{found}`)")]
    WrongKind {
        expected: &'static str,
        found: String,
    },

    #[error("malformed policy file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid service `{name}`: {reason}")]
    InvalidService { name: String, reason: &'static str },

    #[error("service `{name}`: {source}")]
    ServiceField {
        name: String,
        #[source]
        source: ProtocolError,
    },

    #[error("duplicate service `{0}`")]
    DuplicateService(String),

    #[error("invalid device id `{0}`")]
    InvalidDeviceId(String),

    #[error("duplicate client `{0}`")]
    DuplicateClient(String),

    #[error("client `{client}` references non-existing service `{service}`")]
    UnknownService { client: String, service: String },
}
