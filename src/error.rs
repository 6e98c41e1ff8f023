//! Error types for the EoE master stack.

use thiserror::Error;

use crate::types::SlaveId;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the EoE stack.
///
/// Nothing in here is fatal to the cyclic loop: transport failures are
/// retried and then degrade to counted drops, discontinuities reset the
/// reassembly buffer, queue overflow drops the newest frame.
#[derive(Error, Debug)]
pub enum Error {
    /// A mailbox write or read did not complete.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Fragment sequencing broke during reassembly.
    #[error("fragment discontinuity: expected fragment {expected}, got {got}")]
    Discontinuity { expected: u8, got: u8 },

    /// The transmit queue is full; the newest frame was dropped.
    #[error("transmit queue overflow")]
    QueueOverflow,

    /// The frame does not fit the 6-bit complete-size field.
    #[error("frame of {0} octets exceeds the fragmentable maximum")]
    FrameTooLarge(usize),

    /// A mailbox payload too short to carry a fragment header.
    #[error("mailbox payload of {0} octets is shorter than the fragment header")]
    ShortPayload(usize),

    /// A frame type nibble outside the values the protocol defines.
    #[error("unsupported frame type 0x{0:x}")]
    UnsupportedFrameType(u8),

    /// A handler already exists for this slave.
    #[error("handler already registered for {0}")]
    HandlerExists(SlaveId),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors (configuration file loading).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
