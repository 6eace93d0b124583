//! Error types for parley-core

use parley_api::ErrorKind;
use thiserror::Error;

/// Result type alias using parley-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// A send is already in flight for this conversation
    #[error("A message is still being sent in this conversation")]
    Busy,

    /// Opening a conversation failed; previous state kept
    #[error("Failed to load conversation: {0}")]
    Load(#[source] parley_api::Error),

    /// No credential is available
    #[error("Not signed in")]
    Unauthenticated,

    #[error("Failed to rename conversation: {0}")]
    Rename(#[source] parley_api::Error),

    #[error("Failed to delete conversation: {0}")]
    Delete(#[source] parley_api::Error),

    #[error("Failed to load history: {0}")]
    History(#[source] parley_api::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Busy => ErrorKind::Busy,
            Error::Load(_) => ErrorKind::Load,
            Error::Unauthenticated => ErrorKind::Unauthenticated,
            Error::Rename(e) | Error::Delete(e) | Error::History(e) => e.kind(),
        }
    }

    /// The gateway error behind this failure, if any
    pub fn api_error(&self) -> Option<&parley_api::Error> {
        match self {
            Error::Load(e) | Error::Rename(e) | Error::Delete(e) | Error::History(e) => Some(e),
            Error::Busy | Error::Unauthenticated => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_wraps_any_gateway_error() {
        let e = Error::Load(parley_api::Error::from_status(500, "boom"));
        assert_eq!(e.kind(), ErrorKind::Load);
        assert_eq!(e.api_error().map(|e| e.kind()), Some(ErrorKind::Server));
    }

    #[test]
    fn test_wrappers_report_inner_kind() {
        let e = Error::Rename(parley_api::Error::from_status(404, "gone"));
        assert_eq!(e.kind(), ErrorKind::NotFound);
        let e = Error::Delete(parley_api::Error::from_status(403, "no"));
        assert_eq!(e.kind(), ErrorKind::Auth);
    }

    #[test]
    fn test_local_errors() {
        assert_eq!(Error::Busy.kind(), ErrorKind::Busy);
        assert!(Error::Unauthenticated.api_error().is_none());
    }
}
