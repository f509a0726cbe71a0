//! Typed errors carried by device actions

/// Error emitted by a device action in its terminal `Error` state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceActionError {
    #[error("Action rejected by the user on the device")]
    UserRejected,

    #[error("Device is locked")]
    DeviceLocked,

    #[error("Ethereum app is not open on the device")]
    AppNotOpen,

    #[error("Device refused the data: {0}")]
    InvalidData(String),

    #[error("Unexpected status word 0x{0:04x}")]
    UnknownStatus(u16),

    #[error("Malformed device response: {0}")]
    InvalidResponse(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type GetAddressError = DeviceActionError;
pub type SignPersonalMessageError = DeviceActionError;
pub type SignTransactionError = DeviceActionError;
pub type SignTypedDataError = DeviceActionError;

/// Failure of the hardened bridge, which also reports streams that end
/// without a result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceActionFailure<E> {
    #[error("{0}")]
    Action(E),

    #[error("Device action stream ended without a completed state")]
    StreamEnded,

    #[error("Device action was stopped")]
    Stopped,
}
