use std::fmt;

/// Main error type for a ring node
#[derive(Debug)]
pub enum RingError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Send/receive failures on a channel
    Transport(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Datagrams that do not fit the current protocol state
    Protocol(ProtocolError),

    /// Serialization/deserialization errors
    Serialization(serde_json::Error),

    /// The successor needed to forward the token is unknown
    MembershipExhausted(String),

    /// The coordinator refused our discovery request
    JoinRejected(String),

    /// Internal channel or task failures
    Concurrency(String),
}

/// Protocol desynchronization errors; the offending datagram is dropped
#[derive(Debug)]
pub enum ProtocolError {
    /// Payload could not be parsed into a known message
    Malformed(String),

    /// Token arrived from someone other than our predecessor
    UnexpectedSender(String),

    /// Message is valid but not accepted in the current node state
    OutOfPhase(String),
}

/// How a caller should react to a [`RingError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Log, skip the operation and keep running
    Transient,
    /// Drop the message without any state change
    Discard,
    /// This node cannot continue and must stop
    Fatal,
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RingError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RingError::Io(err) => write!(f, "I/O error: {}", err),
            RingError::Protocol(err) => write!(f, "Protocol error: {}", err),
            RingError::Serialization(err) => write!(f, "Serialization error: {}", err),
            RingError::MembershipExhausted(msg) => write!(f, "Membership exhausted: {}", msg),
            RingError::JoinRejected(reason) => write!(f, "Join rejected: {}", reason),
            RingError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed(msg) => write!(f, "malformed message: {}", msg),
            ProtocolError::UnexpectedSender(msg) => write!(f, "unexpected sender: {}", msg),
            ProtocolError::OutOfPhase(msg) => write!(f, "out of phase: {}", msg),
        }
    }
}

impl std::error::Error for RingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RingError::Io(err) => Some(err),
            RingError::Serialization(err) => Some(err),
            RingError::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for ProtocolError {}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, RingError>;

impl RingError {
    /// Classify this error for the node loops and any supervising layer
    pub fn severity(&self) -> Severity {
        match self {
            RingError::Transport(_) | RingError::Io(_) => Severity::Transient,
            RingError::Protocol(_) | RingError::Serialization(_) => Severity::Discard,
            RingError::MembershipExhausted(_)
            | RingError::JoinRejected(_)
            | RingError::Config(_)
            | RingError::Concurrency(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            RingError::Config(_) => "configuration_error",
            RingError::Transport(_) => "transport_error",
            RingError::Io(_) => "io_error",
            RingError::Protocol(_) => "protocol_error",
            RingError::Serialization(_) => "serialization_error",
            RingError::MembershipExhausted(_) => "membership_exhausted",
            RingError::JoinRejected(_) => "join_rejected",
            RingError::Concurrency(_) => "concurrency_error",
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for RingError {
    fn from(err: std::io::Error) -> Self {
        RingError::Io(err)
    }
}

impl From<serde_json::Error> for RingError {
    fn from(err: serde_json::Error) -> Self {
        RingError::Serialization(err)
    }
}

impl From<ProtocolError> for RingError {
    fn from(err: ProtocolError) -> Self {
        RingError::Protocol(err)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RingError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RingError::Concurrency(format!("Command channel closed: {}", err))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::RingError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RingError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::RingError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RingError::Transport(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($msg:expr) => {
        $crate::error::RingError::Protocol($crate::error::ProtocolError::Malformed(
            $msg.to_string(),
        ))
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RingError::Protocol($crate::error::ProtocolError::Malformed(
            format!($fmt, $($arg)*),
        ))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_err = RingError::Config("Invalid port".to_string());
        assert_eq!(config_err.to_string(), "Configuration error: Invalid port");

        let io_err = RingError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert!(io_err.to_string().contains("I/O error"));

        let desync = RingError::Protocol(ProtocolError::UnexpectedSender("10.0.0.9".into()));
        assert_eq!(
            desync.to_string(),
            "Protocol error: unexpected sender: 10.0.0.9"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let ring_err: RingError = io_err.into();

        assert!(matches!(ring_err, RingError::Io(_)));
    }

    #[test]
    fn test_severity_taxonomy() {
        assert_eq!(transport_error!("unreachable").severity(), Severity::Transient);
        assert_eq!(protocol_error!("garbage").severity(), Severity::Discard);
        assert!(RingError::MembershipExhausted("no successor".into()).is_fatal());
        assert!(RingError::JoinRejected("Ring already started".into()).is_fatal());
        assert!(!RingError::Io(std::io::Error::other("full buffer")).is_fatal());
    }

    #[test]
    fn test_macros() {
        let err = config_error!("Probability {} is out of range", 1.5);
        assert_eq!(
            err.to_string(),
            "Configuration error: Probability 1.5 is out of range"
        );

        let err = transport_error!("Send to {} failed", "10.0.0.2");
        assert_eq!(err.to_string(), "Transport error: Send to 10.0.0.2 failed");
        assert_eq!(err.error_type(), "transport_error");
    }
}
