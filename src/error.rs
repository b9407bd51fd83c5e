//! error.rs
//!
//! Error types shared by the parameter store, the GATT dispatcher and the serial link.
//! All are plain `Copy` enums so they can cross the interrupt/main-loop boundary without allocation.

use core::fmt;

/// Failures from `ParameterStore::set_parameter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamError {
    /// Payload length differs from the parameter's encoded size.
    InvalidLength {
        /// Bytes the parameter expects
        expected: usize,
        /// Bytes that were supplied
        got: usize,
    },
    /// The raw id does not name a writable parameter.
    UnknownParameter(u8),
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid parameter length: expected {expected}, got {got}")
            }
            Self::UnknownParameter(id) => write!(f, "unknown parameter id {id}"),
        }
    }
}

/// ATT error responses handed back to the BLE stack.
///
/// The discriminants are the Bluetooth Core ATT error codes so they can be put on the
/// wire unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttError {
    InvalidHandle = 0x01,
    InsufficientAuthorization = 0x08,
    AttributeNotFound = 0x0A,
    AttributeNotLong = 0x0B,
    InvalidValueSize = 0x0D,
}

impl AttError {
    /// ATT protocol error code.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for AttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidHandle => "invalid handle",
            Self::InsufficientAuthorization => "insufficient authorization",
            Self::AttributeNotFound => "attribute not found",
            Self::AttributeNotLong => "attribute not long",
            Self::InvalidValueSize => "invalid attribute value size",
        };
        write!(f, "{text} (0x{:02X})", self.code())
    }
}

impl From<ParamError> for AttError {
    fn from(err: ParamError) -> Self {
        match err {
            ParamError::InvalidLength { .. } => AttError::InvalidValueSize,
            ParamError::UnknownParameter(_) => AttError::AttributeNotFound,
        }
    }
}

/// Malformed frames seen by `link::FrameDecoder`. The decoder has already dropped the
/// frame when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    UnknownOp(u8),
    /// UUID length other than 0, 2 or 16, or one that does not fit the op.
    BadUuidLength(u8),
    /// Declared payload longer than the decoder accepts.
    Oversize(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOp(op) => write!(f, "unknown frame op 0x{op:02X}"),
            Self::BadUuidLength(len) => write!(f, "bad uuid length {len}"),
            Self::Oversize(len) => write!(f, "payload of {len} bytes too long"),
        }
    }
}
