//! Error types shared across components.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse INI file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::Error,
    },
    #[error("missing required key [{section}] {key}")]
    MissingKey { section: String, key: String },
    #[error("invalid value for [{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },
    #[error("{path} is readable by others; refusing to start")]
    WorldReadable { path: String },
}

/// Errors raised by the serial/AT-command transport.
#[derive(Debug, Error)]
pub enum ModemError {
    #[error("failed to open serial device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("termios configuration failed for {device}: {source}")]
    Termios {
        device: String,
        #[source]
        source: nix::Error,
    },
    #[error("AT command timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("modem worker is no longer running")]
    WorkerGone,
    #[error("modem returned an error response: {0}")]
    AtError(String),
    #[error("no candidate serial port matched IMEI {0}")]
    PortNotFound(String),
    #[error("SIM PIN required but none configured")]
    PinRequired,
    #[error("SIM PIN rejected by modem")]
    IncorrectPin,
    #[error("network coverage not acquired within the configured wait")]
    NoNetworkCoverage,
}

/// Errors raised while delivering mail through the SMTP relay.
#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("relay does not support STARTTLS on port 25")]
    PlaintextPortUnsupported,
    #[error("failed to connect to SMTP relay: {0}")]
    Connect(String),
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
}

/// Logical RPC faults, mapped to fixed HTTP status codes at the transport boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RpcFault {
    #[error("bad request")]
    BadRequest,
    #[error("unauthorized")]
    Unauthorized,
    #[error("method not allowed")]
    Disabled,
}

impl RpcFault {
    #[must_use]
    pub fn status_code(self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            RpcFault::BadRequest => StatusCode::BAD_REQUEST,
            RpcFault::Unauthorized => StatusCode::UNAUTHORIZED,
            RpcFault::Disabled => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}
