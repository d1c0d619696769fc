//! Error types for the node.

use std::io;
use thiserror::Error;

/// Node error type. Carries both the teacher's original operational kinds
/// and the abstract kinds a protocol engine needs to reason about (bad wire
/// data vs. exhausted resources vs. a peer that simply went away).
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rule matching error: {0}")]
    Rule(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Malformed wire data: bad endpoint encoding, bad SOCKS5 handshake,
    /// bad Shadowsocks/Trojan framing.
    #[error("bad protocol data: {0}")]
    BadProto(String),

    /// A buffer was too small, or an encoded field exceeded its wire limit
    /// (e.g. a domain name longer than 255 bytes).
    #[error("buffer overflow: {0}")]
    BufferOverflow(String),

    /// Config/JSON body failed to parse as well-formed JSON.
    #[error("malformed JSON: {0}")]
    BadJson(String),

    /// Well-formed but semantically invalid configuration (unknown rule
    /// reference, egress name collision, etc).
    #[error("semantic error: {0}")]
    SemanticError(String),

    /// Attempted to remove/replace a resource that a live route still
    /// references.
    #[error("resource in use: {0}")]
    ResInUse(String),

    /// Attempted to mutate a resource while a conflicting operation holds
    /// it.
    #[error("resource locked: {0}")]
    ResLocked(String),

    /// The egress could not establish the outbound connection.
    #[error("connection failed: {0}")]
    ConnFailure(String),

    /// A SOCKS5/HTTP client requested an auth method the ingress does not
    /// support.
    #[error("unsupported auth method: {0}")]
    BadAuthMethod(String),

    /// Credentials were supplied but rejected.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Catch-all for conditions that don't fit a narrower kind above.
    #[error("{0}")]
    Misc(String),

    /// A duplicate IV/salt was observed. Not a failure: the session
    /// orchestrator routes this to the reject egress with a random delay
    /// rather than reporting it to the client.
    #[error("replayed: {0}")]
    Replayed(String),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn dns<S: Into<String>>(msg: S) -> Self {
        Error::Dns(msg.into())
    }

    pub fn proxy<S: Into<String>>(msg: S) -> Self {
        Error::Proxy(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Error::Auth(msg.into())
    }

    pub fn tls<S: Into<String>>(msg: S) -> Self {
        Error::Tls(msg.into())
    }

    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        Error::Crypto(msg.into())
    }

    pub fn address<S: Into<String>>(msg: S) -> Self {
        Error::Address(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    pub fn io_error<S: Into<String>>(msg: S) -> Self {
        Error::Io(std::io::Error::new(std::io::ErrorKind::Other, msg.into()))
    }

    pub fn bad_proto<S: Into<String>>(msg: S) -> Self {
        Error::BadProto(msg.into())
    }

    pub fn buffer_overflow<S: Into<String>>(msg: S) -> Self {
        Error::BufferOverflow(msg.into())
    }

    pub fn bad_json<S: Into<String>>(msg: S) -> Self {
        Error::BadJson(msg.into())
    }

    pub fn semantic<S: Into<String>>(msg: S) -> Self {
        Error::SemanticError(msg.into())
    }

    pub fn res_in_use<S: Into<String>>(msg: S) -> Self {
        Error::ResInUse(msg.into())
    }

    pub fn res_locked<S: Into<String>>(msg: S) -> Self {
        Error::ResLocked(msg.into())
    }

    pub fn conn_failure<S: Into<String>>(msg: S) -> Self {
        Error::ConnFailure(msg.into())
    }

    pub fn bad_auth_method<S: Into<String>>(msg: S) -> Self {
        Error::BadAuthMethod(msg.into())
    }

    pub fn unauthenticated<S: Into<String>>(msg: S) -> Self {
        Error::Unauthenticated(msg.into())
    }

    pub fn misc<S: Into<String>>(msg: S) -> Self {
        Error::Misc(msg.into())
    }

    pub fn replayed<S: Into<String>>(msg: S) -> Self {
        Error::Replayed(msg.into())
    }

    /// True for the two network conditions the session orchestrator
    /// swallows rather than logging as errors: a peer closing its read
    /// side, or a pending read/write being cancelled by our own shutdown.
    pub fn is_benign_eof(&self) -> bool {
        matches!(
            self,
            Error::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
            )
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::BadJson(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::config("test error");
        assert!(matches!(e, Error::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::protocol("invalid header");
        assert_eq!(e.to_string(), "Protocol error: invalid header");
    }

    #[test]
    fn test_bad_proto_display() {
        let e = Error::bad_proto("unknown ATYP 0x09");
        assert_eq!(e.to_string(), "bad protocol data: unknown ATYP 0x09");
    }

    #[test]
    fn test_benign_eof() {
        let e = Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(e.is_benign_eof());
        let e = Error::bad_proto("x");
        assert!(!e.is_benign_eof());
    }
}
