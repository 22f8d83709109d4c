//! Error types for the hcitransport library
//!
//! This module defines the crate-wide error type. The H4 parser has its own
//! structured status, [`H4Error`], which converts into [`TransportError`].

use crate::h4::H4Error;
use crate::hci::PacketType;
use thiserror::Error;

/// Errors that can occur while moving HCI frames through a transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("H4 framing error: {0}")]
    Sync(#[from] H4Error),

    #[error("Pool exhausted: {0}")]
    PoolExhausted(&'static str),

    #[error("Buffer allocation failed")]
    AllocationFailed,

    #[error("Invalid HCI frame: {0}")]
    InvalidFrame(String),

    #[error("Controller is not enabled")]
    ControllerDisabled,

    #[error("Receiver rejected {0} frame")]
    Rejected(PacketType),

    #[error("No host receiver registered")]
    NoReceiver,

    #[error("Transport is not running")]
    NotRunning,

    #[error("Hardware interface does not match the configured backend")]
    BackendMismatch,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
