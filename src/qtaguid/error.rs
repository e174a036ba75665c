//! Structured error types for scanning the qtaguid accounting file.
//!
//! [`ScanError`] describes why a single line could not be tokenized. These errors never abort a
//! scan: [`QTagParser`](super::QTagParser) logs them together with the line number and moves on to
//! the next line. [`ReadError`] is returned when the file as a whole could not be read.
//!
//! # Example
//!
//! ```rust
//! use connclass::qtaguid::{ByteArrayScanner, ScanError};
//!
//! let mut scanner = ByteArrayScanner::new(b"2 wlan0", b' ');
//! scanner.skip().unwrap();
//! let err = scanner.next_u64().unwrap_err();
//! assert!(matches!(err, ScanError::InvalidNumber { offset: 2 }));
//! ```

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::fsutil::FileOpenError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("reading past end of input at offset {offset}")]
    NoSuchElement { offset: usize },

    #[error("invalid number in buffer at offset {offset}")]
    InvalidNumber { offset: usize },
}

impl From<ScanError> for std::io::Error {
    fn from(err: ScanError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, err)
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Open(#[from] FileOpenError),

    #[error("failed to read `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ScanError>;
