use crate::endpoint::{ EndpointId, Side };
use crate::fsm::SessionState;

/// Failure reported by an endpoint link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("endpoint {0} is not connected")]
    NotConnected(EndpointId),
    #[error("endpoint {endpoint} rejected write: {reason}")]
    WriteRejected {
        endpoint: EndpointId,
        reason: String,
    },
    #[error("endpoint {endpoint} failed to connect: {reason}")]
    ConnectFailed {
        endpoint: EndpointId,
        reason: String,
    },
}

/// Inbound frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("truncated frame for command 0x{command:02X}: {len} bytes, need {need}")]
    Truncated {
        command: u8,
        len: usize,
        need: usize,
    },
    #[error("unknown command 0x{0:02X}")]
    UnknownCommand(u8),
    #[error("unknown touch subcode 0x{0:02X}")]
    UnknownTouch(u8),
    #[error("unknown mic ack status 0x{0:02X}")]
    UnknownMicStatus(u8),
}

/// Audio packet arrived with a sequence byte other than the expected one.
///
/// Non-fatal: the payload is still accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("audio sequence gap: expected {expected}, received {received}")]
pub struct SequenceGap {
    pub expected: u8,
    pub received: u8,
}

/// A discovered endpoint carried no usable left/right marker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot determine side for {name:?} ({endpoint}), assigned to both slots")]
pub struct PairingAmbiguous {
    pub name: String,
    pub endpoint: EndpointId,
}

/// Error returned by the session's outbound operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session not connected (state: {0})")]
    NotConnected(SessionState),
    #[error("device pair has no endpoints")]
    NoEndpoints,
    #[error("{side} link: {source}")]
    Link {
        side: Side,
        #[source]
        source: LinkError,
    },
    #[error("transfer aborted after {sent}/{total} frames")]
    TransferAborted {
        sent: usize,
        total: usize,
    },
    #[error("transfer failed after {sent}/{total} frames: {reason}")]
    TransferFailed {
        sent: usize,
        total: usize,
        reason: String,
    },
}
