//! events.rs
//!
//! Events flowing between the BLE collaborator and the device: inbound GATT/link
//! events, the device's responses, and the advisory outbound notifications.

use heapless::Deque;

use crate::error::AttError;
use crate::hal::Channel;
use crate::params::ParamId;

/// Capacity of the outbound notification queue.
pub const OUTBOX_CAPACITY: usize = 8;

/// Attribute type as presented by the BLE stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeUuid {
    /// 16-bit UUID, the only form this service registers.
    Short(u16),
    /// 128-bit UUID.
    Long(u128),
}

/// Events delivered by the BLE stack (or the serial bridge standing in for it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattEvent<'a> {
    Connected,
    Disconnected,
    /// External wake source, e.g. the wake button.
    Wake,
    Write {
        uuid: AttributeUuid,
        offset: u16,
        value: &'a [u8],
        /// Link carries the authorization a protected attribute needs.
        authorized: bool,
    },
    Read {
        uuid: AttributeUuid,
        offset: u16,
        authorized: bool,
    },
}

/// Answer handed back to the BLE stack for one `GattEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattResponse {
    /// Link event or write accepted.
    Done,
    /// One-byte read result.
    Value(u8),
    Error(AttError),
}

impl From<Result<(), AttError>> for GattResponse {
    fn from(result: Result<(), AttError>) -> Self {
        match result {
            Ok(()) => GattResponse::Done,
            Err(e) => GattResponse::Error(e),
        }
    }
}

/// Advisory notifications for the BLE layer / UI. They may be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    ParameterChanged(ParamId),
    BatteryLevel(u8),
    /// Advertising should be enabled (true) or disabled (false).
    Advertising(bool),
    SessionFinished(Channel),
}

/// Bounded outbound notification queue. New notifications are dropped when full.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Deque<Notification, OUTBOX_CAPACITY>,
    dropped: u32,
}

impl Outbox {
    pub const fn new() -> Self {
        Outbox {
            queue: Deque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, notification: Notification) {
        if self.queue.push_back(notification).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
            log::debug!("outbox full, dropped {:?}", notification);
        }
    }

    pub fn pop(&mut self) -> Option<Notification> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Notifications lost to a full queue since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
