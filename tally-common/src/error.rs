use thiserror::Error;

/// Errors shared by every tally crate.
///
/// Protocol and crypto failures are normally logged and dropped by the
/// consensus handlers; they only surface as values from the lower layers
/// (log, codec, identity) so the caller can decide what to do.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("can't rewrite chain: index {index} <= last index {last}")]
    ChainRewrite { index: u64, last: u64 },

    #[error("gap in chain: index {index} after last index {last}")]
    ChainGap { index: u64, last: u64 },

    #[error("wrong hash: expected {expected}, got {got}")]
    WrongHash { expected: String, got: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    #[error("Node {0} is not a cluster member")]
    NotMember(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other: {0}")]
    Other(String),
}

impl From<bincode::Error> for TallyError {
    fn from(e: bincode::Error) -> Self {
        TallyError::Codec(e.to_string())
    }
}

impl From<String> for TallyError {
    fn from(message: String) -> Self {
        TallyError::Other(message)
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;
