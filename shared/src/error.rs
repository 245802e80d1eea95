/// Errors raised while decoding service data from its textual form,
/// either from the discovery wire format or from policy files.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown protocol `{0}`")]
    UnknownProtocol(String),

    #[error("bad port value `{0}`")]
    BadPort(String),

    #[error("icmp has no ports")]
    UnexpectedPort,

    #[error("missing port for {0}")]
    MissingPort(String),

    #[error("bad protocol port combo: expected 1 or 2 elements, got {0}")]
    BadArity(usize),

    #[error("unknown access type `{0}`")]
    UnknownAccessType(String),

    #[error("bad address `{0}`")]
    BadAddress(String),
}
