pub mod config;
pub mod identity;

pub use config::server_config;
pub use identity::PeerIdentity;
