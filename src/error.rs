use thiserror::Error;

pub type Result<T> = std::result::Result<T, RingError>;

#[derive(Error, Debug)]
pub enum RingError {
    #[error("ring store error: {0}")]
    Store(String),

    #[error("ring state corrupted: {0}")]
    Corrupted(String),

    #[error("node already registered: {0}")]
    DuplicateNode(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("no node available")]
    NoNodeAvailable,

    #[error("no other node to take over")]
    NoOtherNode,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
