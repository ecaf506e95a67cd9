//! Unified error type for Proctor.

use proctor_drafts::DraftError;
use proctor_protocol::ProtocolError;
use proctor_runtime::RuntimeError;
use proctor_session::{ClientError, SessionError};

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `proctor` meta-crate, you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant generates the `From` impls, so `?` converts
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ProctorError {
    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A server call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The lifecycle couldn't finish the session (yet).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Draft storage failed.
    #[error(transparent)]
    Draft(#[from] DraftError),

    /// A session actor request failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_protocol::SessionId;

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("empty status".into());
        let proctor_err: ProctorError = err.into();
        assert!(matches!(proctor_err, ProctorError::Protocol(_)));
        assert!(proctor_err.to_string().contains("empty status"));
    }

    #[test]
    fn test_from_client_error() {
        let err = ClientError::Network("reset".into());
        let proctor_err: ProctorError = err.into();
        assert!(matches!(proctor_err, ProctorError::Client(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::FinalizeStalled {
            session_id: SessionId(1),
            attempts: 8,
            last: ClientError::Network("reset".into()),
        };
        let proctor_err: ProctorError = err.into();
        assert!(matches!(proctor_err, ProctorError::Session(_)));
        assert!(proctor_err.to_string().contains("8 attempts"));
    }

    #[test]
    fn test_from_draft_error() {
        let err = DraftError::WriterClosed("proctor.drafts.1".into());
        let proctor_err: ProctorError = err.into();
        assert!(matches!(proctor_err, ProctorError::Draft(_)));
    }

    #[test]
    fn test_from_runtime_error() {
        let err = RuntimeError::Unavailable(SessionId(4));
        let proctor_err: ProctorError = err.into();
        assert!(matches!(proctor_err, ProctorError::Runtime(_)));
        assert_eq!(proctor_err.to_string(), "session S-4 is unavailable");
    }
}
