//! link.rs
//!
//! Serial GATT bridge framing. A BLE front end that owns the radio forwards link events
//! and attribute requests over a UART; the device answers each request and pushes its
//! queued notifications back.
//!
//! Request:  `A5 op flags uuid_len uuid[uuid_len] offset_lo offset_hi len payload[len]`
//! Response: `5A op status len payload[len]`
//!
//! Link ops (`C`, `D`, `X`) carry no UUID. Attribute ops (`W`, `R`) carry a 2 or 16 byte
//! little-endian UUID. Bit 0 of `flags` marks an authorized link.

use heapless::Vec;

use crate::error::FrameError;
use crate::events::{AttributeUuid, GattEvent, GattResponse, Notification};
use crate::hal::Channel;

pub const REQUEST_START: u8 = 0xA5;
pub const RESPONSE_START: u8 = 0x5A;

/// Longest attribute value the bridge forwards.
pub const MAX_PAYLOAD: usize = 16;

const HEADER_LEN: usize = 4;
const MAX_UUID_LEN: usize = 16;
const MAX_FRAME: usize = HEADER_LEN + MAX_UUID_LEN + 3 + MAX_PAYLOAD;
const MAX_OUT_FRAME: usize = 5;

const FLAG_AUTHORIZED: u8 = 0x01;
const NOTIFY_OP: u8 = b'N';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Connected = b'C',
    Disconnected = b'D',
    Write = b'W',
    Read = b'R',
    Wake = b'X',
}

impl Op {
    fn from_byte(byte: u8) -> Option<Op> {
        match byte {
            b'C' => Some(Op::Connected),
            b'D' => Some(Op::Disconnected),
            b'W' => Some(Op::Write),
            b'R' => Some(Op::Read),
            b'X' => Some(Op::Wake),
            _ => None,
        }
    }

    const fn addresses_attribute(self) -> bool {
        matches!(self, Op::Write | Op::Read)
    }
}

/// One decoded bridge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connected,
    Disconnected,
    Wake,
    Write {
        uuid: AttributeUuid,
        offset: u16,
        value: Vec<u8, MAX_PAYLOAD>,
        authorized: bool,
    },
    Read {
        uuid: AttributeUuid,
        offset: u16,
        authorized: bool,
    },
}

impl Request {
    pub fn op(&self) -> Op {
        match self {
            Request::Connected => Op::Connected,
            Request::Disconnected => Op::Disconnected,
            Request::Wake => Op::Wake,
            Request::Write { .. } => Op::Write,
            Request::Read { .. } => Op::Read,
        }
    }

    /// The request as the event the device handles.
    pub fn event(&self) -> GattEvent<'_> {
        match self {
            Request::Connected => GattEvent::Connected,
            Request::Disconnected => GattEvent::Disconnected,
            Request::Wake => GattEvent::Wake,
            Request::Write {
                uuid,
                offset,
                value,
                authorized,
            } => GattEvent::Write {
                uuid: *uuid,
                offset: *offset,
                value,
                authorized: *authorized,
            },
            Request::Read {
                uuid,
                offset,
                authorized,
            } => GattEvent::Read {
                uuid: *uuid,
                offset: *offset,
                authorized: *authorized,
            },
        }
    }
}

/// Byte-at-a-time request decoder. Bytes outside a frame are skipped until the next
/// start byte, so a corrupted frame costs at most that frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8, MAX_FRAME>,
}

impl FrameDecoder {
    pub const fn new() -> Self {
        FrameDecoder { buf: Vec::new() }
    }

    /// Feed one received byte.
    ///
    /// Returns `Ok(Some(_))` when the byte completes a frame.
    ///
    /// # Errors
    /// Returns a `FrameError` when the frame turned out malformed; it has been dropped.
    pub fn push(&mut self, byte: u8) -> Result<Option<Request>, FrameError> {
        if self.buf.is_empty() && byte != REQUEST_START {
            return Ok(None);
        }
        if self.buf.push(byte).is_err() {
            self.buf.clear();
            return Err(FrameError::Oversize(byte));
        }
        match self.parse() {
            Ok(None) => Ok(None),
            done => {
                self.buf.clear();
                done
            }
        }
    }

    fn parse(&self) -> Result<Option<Request>, FrameError> {
        let buf = self.buf.as_slice();
        if buf.len() < 2 {
            return Ok(None);
        }
        let op = Op::from_byte(buf[1]).ok_or(FrameError::UnknownOp(buf[1]))?;
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let authorized = buf[2] & FLAG_AUTHORIZED != 0;
        let uuid_len = buf[3];
        match (op.addresses_attribute(), uuid_len) {
            (true, 2) | (true, 16) | (false, 0) => {}
            _ => return Err(FrameError::BadUuidLength(uuid_len)),
        }

        let len_at = HEADER_LEN + uuid_len as usize + 2;
        if buf.len() <= len_at {
            return Ok(None);
        }
        let len = buf[len_at];
        if len as usize > MAX_PAYLOAD {
            return Err(FrameError::Oversize(len));
        }
        let payload_at = len_at + 1;
        if buf.len() < payload_at + len as usize {
            return Ok(None);
        }

        let uuid = decode_uuid(&buf[HEADER_LEN..HEADER_LEN + uuid_len as usize]);
        let offset = u16::from_le_bytes([buf[len_at - 2], buf[len_at - 1]]);
        let payload = &buf[payload_at..];

        let request = match (op, uuid) {
            (Op::Connected, _) => Request::Connected,
            (Op::Disconnected, _) => Request::Disconnected,
            (Op::Wake, _) => Request::Wake,
            (Op::Write, Some(uuid)) => Request::Write {
                uuid,
                offset,
                value: Vec::from_slice(payload).map_err(|_| FrameError::Oversize(len))?,
                authorized,
            },
            (Op::Read, Some(uuid)) => Request::Read {
                uuid,
                offset,
                authorized,
            },
            (Op::Write | Op::Read, None) => return Err(FrameError::BadUuidLength(uuid_len)),
        };
        Ok(Some(request))
    }
}

fn decode_uuid(bytes: &[u8]) -> Option<AttributeUuid> {
    match bytes.len() {
        2 => Some(AttributeUuid::Short(u16::from_le_bytes([bytes[0], bytes[1]]))),
        16 => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(bytes);
            Some(AttributeUuid::Long(u128::from_le_bytes(raw)))
        }
        _ => None,
    }
}

/// An encoded outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutFrame {
    bytes: [u8; MAX_OUT_FRAME],
    len: usize,
}

impl OutFrame {
    fn new(op: u8, status: u8, payload: Option<u8>) -> Self {
        let mut bytes = [RESPONSE_START, op, status, 0, 0];
        let len = match payload {
            Some(value) => {
                bytes[3] = 1;
                bytes[4] = value;
                5
            }
            None => 4,
        };
        OutFrame { bytes, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Encode the answer to a request.
pub fn encode_response(op: Op, response: GattResponse) -> OutFrame {
    match response {
        GattResponse::Done => OutFrame::new(op as u8, 0, None),
        GattResponse::Value(value) => OutFrame::new(op as u8, 0, Some(value)),
        GattResponse::Error(e) => OutFrame::new(op as u8, e.code(), None),
    }
}

/// Encode a queued notification. The status byte carries the notification kind.
pub fn encode_notification(notification: Notification) -> OutFrame {
    let (kind, value) = match notification {
        Notification::ParameterChanged(id) => (1, id as u8),
        Notification::BatteryLevel(level) => (2, level),
        Notification::Advertising(on) => (3, on as u8),
        Notification::SessionFinished(Channel::Left) => (4, 0),
        Notification::SessionFinished(Channel::Right) => (4, 1),
    };
    OutFrame::new(NOTIFY_OP, kind, Some(value))
}
