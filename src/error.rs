use crate::storage::parse;
use crate::types::ObjId;
use thiserror::Error;

/// The error type returned by every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum ConcordError {
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("invalid change: {0}")]
    InvalidChange(String),
    #[error("object {0} is not present in the document")]
    InvalidObjId(ObjId),
    #[error("encoding failed: {0}")]
    Encoding(String),
    #[error("decoding failed: {0}")]
    Decoding(String),
    #[error("invalid sync message: {0}")]
    Sync(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("index {0} is out of bounds")]
    InvalidIndex(usize),
}

impl From<crate::columnar::encoding::DecodeError> for ConcordError {
    fn from(e: crate::columnar::encoding::DecodeError) -> Self {
        ConcordError::Decoding(e.to_string())
    }
}

impl From<parse::ParseError<parse::ErrorKind>> for ConcordError {
    fn from(e: parse::ParseError<parse::ErrorKind>) -> Self {
        ConcordError::Decoding(e.to_string())
    }
}

#[derive(Error, Debug)]
#[error("invalid actor id: {0}")]
pub struct InvalidActorId(pub String);

#[derive(Error, Debug)]
#[error("invalid change hash slice: {0:?}")]
pub struct InvalidChangeHashSlice(pub Vec<u8>);
