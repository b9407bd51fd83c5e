//! gatt.rs
//!
//! CharacteristicDispatcher: validates GATT reads and writes against a static
//! characteristic registry and forwards them to a `GattBackend`.
//!
//! Every characteristic in the service carries exactly one byte; none is "long", so any
//! non-zero offset is rejected.

use crate::error::{AttError, ParamError};
use crate::events::AttributeUuid;
use crate::hal::Channel;
use crate::params::{PARAM_LEN, ParamId};

/// Primary service UUID.
pub const SERVICE_UUID: u16 = 0xB2B0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicKind {
    /// Readable and writable stimulation parameter.
    Parameter(ParamId),
    /// Write-only "start stimulation" trigger; the written byte is ignored.
    Stimulate(Channel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: u16,
    pub kind: CharacteristicKind,
    pub requires_authorization: bool,
}

impl Characteristic {
    pub const fn parameter(uuid: u16, id: ParamId) -> Self {
        Characteristic {
            uuid,
            kind: CharacteristicKind::Parameter(id),
            requires_authorization: false,
        }
    }

    pub const fn trigger(uuid: u16, channel: Channel) -> Self {
        Characteristic {
            uuid,
            kind: CharacteristicKind::Stimulate(channel),
            requires_authorization: false,
        }
    }

    pub const fn readable(&self) -> bool {
        matches!(self.kind, CharacteristicKind::Parameter(_))
    }
}

/// The stimulation service.
pub static CHARACTERISTICS: [Characteristic; 13] = [
    Characteristic::parameter(0xB2B1, ParamId::Frequency),
    Characteristic::parameter(0xB2B2, ParamId::PulseWidth),
    Characteristic::parameter(0xB2B3, ParamId::Duration),
    Characteristic::parameter(0xB2B4, ParamId::RandomMode),
    Characteristic::trigger(0xB2B5, Channel::Left),
    Characteristic::trigger(0xB2B6, Channel::Right),
    Characteristic::parameter(0xB2B7, ParamId::Gain),
    Characteristic::parameter(0xB2B8, ParamId::FreqMin),
    Characteristic::parameter(0xB2B9, ParamId::FreqMax),
    Characteristic::parameter(0xB2BA, ParamId::PulseWidthMin),
    Characteristic::parameter(0xB2BB, ParamId::PulseWidthMax),
    Characteristic::parameter(0xB2BC, ParamId::GainMin),
    Characteristic::parameter(0xB2BD, ParamId::GainMax),
];

/// What a validated request is forwarded to.
pub trait GattBackend {
    fn read_parameter(&self, id: ParamId) -> u8;
    /// Store an encoded parameter value.
    fn write_parameter(&mut self, id: ParamId, value: &[u8]) -> Result<(), ParamError>;
    fn stimulate(&mut self, channel: Channel);
}

#[derive(Debug, Clone, Copy)]
pub struct CharacteristicDispatcher<'t> {
    table: &'t [Characteristic],
}

impl CharacteristicDispatcher<'static> {
    pub const fn new() -> Self {
        CharacteristicDispatcher {
            table: &CHARACTERISTICS,
        }
    }
}

impl Default for CharacteristicDispatcher<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'t> CharacteristicDispatcher<'t> {
    pub const fn with_table(table: &'t [Characteristic]) -> Self {
        CharacteristicDispatcher { table }
    }

    pub fn lookup(&self, uuid: AttributeUuid) -> Result<&'t Characteristic, AttError> {
        match uuid {
            AttributeUuid::Long(_) => Err(AttError::InvalidHandle),
            AttributeUuid::Short(short) => self
                .table
                .iter()
                .find(|c| c.uuid == short)
                .ok_or(AttError::AttributeNotFound),
        }
    }

    /// Validate a write and forward it.
    ///
    /// # Errors
    /// - `InvalidHandle` for a 128-bit UUID
    /// - `AttributeNotFound` for an unknown 16-bit UUID
    /// - `InsufficientAuthorization` if the characteristic needs an authorized link
    /// - `AttributeNotLong` for a non-zero offset
    /// - `InvalidValueSize` if the value is not one byte
    pub fn write<B: GattBackend>(
        &self,
        backend: &mut B,
        uuid: AttributeUuid,
        offset: u16,
        value: &[u8],
        authorized: bool,
    ) -> Result<(), AttError> {
        let characteristic = self.authorize(uuid, authorized)?;
        if offset != 0 {
            return Err(AttError::AttributeNotLong);
        }

        match characteristic.kind {
            CharacteristicKind::Parameter(id) => {
                backend.write_parameter(id, value).map_err(|e| {
                    log::debug!("write to {:#06X}: {}", characteristic.uuid, e);
                    AttError::from(e)
                })
            }
            CharacteristicKind::Stimulate(channel) => {
                if value.len() != PARAM_LEN {
                    return Err(AttError::InvalidValueSize);
                }
                backend.stimulate(channel);
                Ok(())
            }
        }
    }

    /// Validate a read and fetch the value.
    ///
    /// # Errors
    /// Same lookup and offset errors as [`Self::write`]; reading a trigger yields
    /// `AttributeNotFound`.
    pub fn read<B: GattBackend>(
        &self,
        backend: &B,
        uuid: AttributeUuid,
        offset: u16,
        authorized: bool,
    ) -> Result<u8, AttError> {
        let characteristic = self.authorize(uuid, authorized)?;
        if offset != 0 {
            return Err(AttError::AttributeNotLong);
        }
        match characteristic.kind {
            CharacteristicKind::Parameter(id) => Ok(backend.read_parameter(id)),
            CharacteristicKind::Stimulate(_) => Err(AttError::AttributeNotFound),
        }
    }

    fn authorize(
        &self,
        uuid: AttributeUuid,
        authorized: bool,
    ) -> Result<&'t Characteristic, AttError> {
        let characteristic = self.lookup(uuid)?;
        if characteristic.requires_authorization && !authorized {
            return Err(AttError::InsufficientAuthorization);
        }
        Ok(characteristic)
    }
}
