use crate::command::Command;
use thiserror::Error;

/// Errors raised by the frame codec.
///
/// `Incomplete`, `ChecksumInvalid` and `Oversized` are resolved inside the
/// reassembly loop and never reach command callers. `PayloadTooLarge` is the
/// only failure of frame construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// More bytes are needed. Bytes before `offset` can never start a frame.
    #[error("incomplete frame, candidate starts at offset {offset}")]
    Incomplete { offset: usize },

    #[error("checksum mismatch at offset {offset}: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumInvalid { offset: usize, expected: u8, actual: u8 },

    #[error("declared payload length {length} at offset {offset} exceeds the frame limit")]
    Oversized { offset: usize, length: usize },
}

/// The primary error type for the `horizon-lib` library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("session is not ready")]
    NotReady,

    #[error("link lost")]
    LinkLost,

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("timed out waiting for the write acknowledgement")]
    WriteTimeout,

    #[error("short response: expected at least {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    /// A second response wait was registered while one was outstanding.
    #[error("protocol violation: a response is already being awaited for {outstanding:?}")]
    ProtocolViolation { outstanding: Command },

    #[error("device reported status {status:#04x} for {command:?}")]
    DeviceStatus { command: Command, status: u8 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("transport error: {0}")]
    Transport(String),
}

impl LinkError {
    /// Whether the orchestration layer may reasonably retry the command.
    /// The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::Timeout | LinkError::WriteTimeout | LinkError::LinkLost
        )
    }
}
