//! Defines all console side errors

use std::fmt;

use crate::authority::{AuthorityError, ServiceKind};
use crate::model::Domain;
use crate::registry::ConnectionId;

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // Staging and committing
    //-----------------------------------------------------------------

    // A record could not be staged, e.g. because a lookup needed to
    // compute it failed. Nothing was appended to the log.
    Staging { operation: String, cause: AuthorityError },

    // The authority did not apply the log. The log is discarded.
    Commit(AuthorityError),

    // Appending to a log that was closed.
    LogClosed,

    //-----------------------------------------------------------------
    // Reading
    //-----------------------------------------------------------------
    Refresh { domain: Domain, cause: AuthorityError },

    //-----------------------------------------------------------------
    // Connections
    //-----------------------------------------------------------------
    UnknownConnection(ConnectionId),

    Connect {
        connection: ConnectionId,
        service: ServiceKind,
        cause: AuthorityError,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Staging { operation, cause } => write!(f, "Cannot stage '{operation}': {cause}"),
            Error::Commit(cause) => write!(f, "Commit failed: {cause}"),
            Error::LogClosed => write!(f, "Action log is closed"),
            Error::Refresh { domain, cause } => write!(f, "Cannot refresh {domain}: {cause}"),
            Error::UnknownConnection(connection) => write!(f, "Unknown connection '{connection}'"),
            Error::Connect {
                connection,
                service,
                cause,
            } => write!(f, "Cannot reach {service} service on '{connection}': {cause}"),
        }
    }
}

impl Error {
    pub fn staging(operation: impl Into<String>, cause: AuthorityError) -> Self {
        Error::Staging {
            operation: operation.into(),
            cause,
        }
    }

    /// The remote error underneath this error, if there is one.
    pub fn authority_error(&self) -> Option<&AuthorityError> {
        match self {
            Error::Staging { cause, .. }
            | Error::Commit(cause)
            | Error::Refresh { cause, .. }
            | Error::Connect { cause, .. } => Some(cause),
            Error::LogClosed | Error::UnknownConnection(_) => None,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.authority_error().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn display_and_source() {
        let err = Error::Commit(AuthorityError::Rejected("bad property".to_string()));
        assert_eq!("Commit failed: rejected by remote service: bad property", err.to_string());
        assert!(err.source().is_some());
        assert!(Error::LogClosed.source().is_none());
    }
}
