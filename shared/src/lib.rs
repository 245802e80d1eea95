pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
