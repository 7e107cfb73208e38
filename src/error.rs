use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The server answered this command with an `-ERR ...` reply line.
    ///
    /// This is a per-command failure and does not poison the connection.
    #[error("Server error: {0}")]
    ErrorReply(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad config error: {0}")]
    BadConfig(String),

    /// AUTH was refused. Terminal: establishment does not retry on this.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The connection was closed by the user; it never reconnects.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The byte stream ended in the middle of a reply frame.
    #[error("Unexpected end of stream")]
    Eof,

    /// Protocol violation: unknown frame tag, missing CRLF after a bulk
    /// payload, or a reply accessed as the wrong shape.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Subscription closed")]
    SubscriptionClosed,
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}

impl Error {
    /// Whether a higher-level executor may reconnect and reissue after
    /// this failure. Only transport faults not attributable to a
    /// deliberate close qualify.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Error::Eof => true,
            Error::ErrorReply(_)
            | Error::BadConfig(_)
            | Error::Authentication(_)
            | Error::ConnectionClosed
            | Error::InvalidState(_)
            | Error::SubscriptionClosed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_faults_are_retriable() {
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert!(err.is_retriable());
        assert!(Error::Eof.is_retriable());
    }

    #[test]
    fn terminal_faults_are_not_retriable() {
        assert!(!Error::Authentication("WRONGPASS".into()).is_retriable());
        assert!(!Error::ConnectionClosed.is_retriable());
        assert!(!Error::ErrorReply("ERR unknown command".into()).is_retriable());
        assert!(!Error::InvalidState("bad tag".into()).is_retriable());

        // Not every IO fault is worth a reconnect.
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(!err.is_retriable());
    }
}
