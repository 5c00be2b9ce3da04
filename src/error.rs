//! Unified error handling for the page store.
//!
//! This module defines [`Error`], the single error type propagated
//! throughout the crate -- from the checksum and header codecs, through
//! the file I/O adapter, up to the public [`crate::PageStore`] surface.
//!
//! A convenience [`Result<T>`] type alias is re-exported so that callers
//! can write `Result<T>` instead of `std::result::Result<T, Error>`.

use std::fmt;
use std::io;

/// The canonical error type for all page store operations.
///
/// Variants are organised by failure category so that callers can match
/// on the kind of failure without inspecting free-form strings.
#[derive(Debug)]
pub enum Error {
    /// An I/O error originating from the filesystem.
    Io(io::Error),

    /// The caller violated a documented precondition: an out-of-range
    /// page id, a wrong-sized write buffer, an attempt to free a header
    /// page, or a transaction used out of turn.
    Precondition(String),

    /// A configuration value supplied at [`crate::PageStore::create`] was
    /// invalid (page size not a power of two, or smaller than the
    /// minimum).
    InvalidConfig(String),

    /// The on-disk file is corrupt or unrecognised: both header slots
    /// failed validation, or the stored page size is implausible.
    Corrupt(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Precondition(msg) => write!(f, "precondition violation: {msg}"),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::Corrupt(msg) => write!(f, "corrupt page store: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialised [`Result`] type for page store operations.
pub type Result<T> = std::result::Result<T, Error>;
