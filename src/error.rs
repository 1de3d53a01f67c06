use thiserror::Error;

/// Error taxonomy shared by every protocol layer.
///
/// `Transient` is the only caller-recoverable kind; `Disqualified` is
/// terminal for the current protocol instance but not for the session.
#[derive(Error, Debug)]
pub enum MpcError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("domain check failed: {0}")]
    DomainFailure(String),

    #[error("cryptographic failure: {0}")]
    CryptoFailure(String),

    #[error("protocol violation by party {party:?}: {reason}")]
    ProtocolViolation {
        /// Peer the violation is attributed to, when known.
        party: Option<usize>,
        reason: String,
    },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("local party disqualified: {0}")]
    Disqualified(String),
}

impl MpcError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        MpcError::InvalidArgument(msg.into())
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        MpcError::DomainFailure(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        MpcError::CryptoFailure(msg.into())
    }

    pub fn violation(party: impl Into<Option<usize>>, reason: impl Into<String>) -> Self {
        MpcError::ProtocolViolation {
            party: party.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        MpcError::Transient(format!("timeout while {}", what.into()))
    }

    /// Whether the caller may retry the failed step.
    pub fn is_transient(&self) -> bool {
        matches!(self, MpcError::Transient(_))
    }
}

pub type MpcResult<T> = Result<T, MpcError>;
