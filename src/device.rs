//! Device records owned by the platform's device database.
//!
//! The crate never owns device lifetime; it holds [`DeviceHandle`]s and goes
//! through [`DeviceStore`] and [`DeviceProperties`] for everything else.

use heapless::Vec;

use crate::constants::MAX_PROPERTY_BLOB;
use crate::{BluetoothAddress, DongleError};

/// Opaque reference to a record in the device database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceHandle(pub u16);

/// Raw property payload
pub type PropertyBlob = Vec<u8, MAX_PROPERTY_BLOB>;

/// Typed storage attached to a device record
pub trait DeviceProperties {
    /// Read the blob stored under `tag`
    fn property(&self, device: DeviceHandle, tag: u8) -> Option<PropertyBlob>;

    /// Store `data` under `tag`
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::StorageFailed`] if the record cannot be written.
    fn set_property(&mut self, device: DeviceHandle, tag: u8, data: &[u8])
    -> Result<(), DongleError>;
}

/// Paired device database as seen by the dongle
pub trait DeviceStore {
    /// Find or create the record of a sink that just paired
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::StorageFailed`] when the database is full.
    fn create_sink(&mut self, addr: BluetoothAddress) -> Result<DeviceHandle, DongleError>;

    /// Address of a device record
    fn address(&self, device: DeviceHandle) -> Option<BluetoothAddress>;

    /// Most recently used sink, if any has been paired
    fn mru_sink(&self) -> Option<DeviceHandle>;

    /// Remove every paired device
    fn delete_all_paired(&mut self);
}
