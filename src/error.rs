//! Crate-wide error type, mirroring the RC status-code taxonomy of the
//! storage engine's external contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("key not found")]
    NotFound,

    #[error("failed to open {path}: {source}")]
    IoOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read error: {0}")]
    IoRead(#[source] std::io::Error),

    #[error("write error: {0}")]
    IoWrite(#[source] std::io::Error),

    #[error("sync error: {0}")]
    IoSync(#[source] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is full")]
    Full(&'static str),

    #[error("{0} is not implemented")]
    Unimplemented(&'static str),

    #[error("json parse error: {0}")]
    JsonParse(#[source] serde_json::Error),

    #[error("manifest record missing member: {0}")]
    JsonMemberMissing(&'static str),

    #[error("unexpected end of record")]
    RecordEof,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::JsonParse(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
