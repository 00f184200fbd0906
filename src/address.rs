use core::fmt::Write;

use crate::DongleError;
use crate::constants::BD_ADDR_LENGTH;

/// A Bluetooth Device Address (`BD_ADDR`), stored least significant byte first
/// as it travels over HCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BluetoothAddress(pub [u8; BD_ADDR_LENGTH]);

impl BluetoothAddress {
    /// Create a new Bluetooth address from little-endian bytes
    #[must_use]
    pub const fn new(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }

    /// Build an address from its NAP, UAP and LAP parts
    #[must_use]
    pub const fn from_parts(nap: u16, uap: u8, lap: u32) -> Self {
        let lap = lap.to_le_bytes();
        let nap = nap.to_le_bytes();
        Self([lap[0], lap[1], lap[2], uap, nap[0], nap[1]])
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BD_ADDR_LENGTH] {
        &self.0
    }

    /// Lower address part (24 bits)
    #[must_use]
    pub const fn lap(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], 0])
    }

    /// Upper address part (8 bits)
    #[must_use]
    pub const fn uap(&self) -> u8 {
        self.0[3]
    }

    /// Non-significant address part (16 bits)
    #[must_use]
    pub const fn nap(&self) -> u16 {
        u16::from_le_bytes([self.0[4], self.0[5]])
    }

    /// `true` for the all-zero placeholder address
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Format as the conventional `NAP:UAP:LAP` colon separated hex string,
    /// most significant byte first.
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().rev().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            write!(result, "{byte:02X}").ok();
        }
        result
    }

    /// Parse a colon separated, most significant byte first, hex string
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::InvalidParameter`] unless the string has exactly six
    /// two-digit hex groups.
    pub fn from_hex(hex: &str) -> Result<Self, DongleError> {
        if hex.len() != 17 {
            return Err(DongleError::InvalidParameter);
        }
        let mut bytes = [0u8; BD_ADDR_LENGTH];
        let mut groups = 0;
        for (i, group) in hex.split(':').enumerate() {
            if i >= BD_ADDR_LENGTH || group.len() != 2 {
                return Err(DongleError::InvalidParameter);
            }
            bytes[BD_ADDR_LENGTH - 1 - i] =
                u8::from_str_radix(group, 16).map_err(|_| DongleError::InvalidParameter)?;
            groups += 1;
        }
        if groups != BD_ADDR_LENGTH {
            return Err(DongleError::InvalidParameter);
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; BD_ADDR_LENGTH]> for BluetoothAddress {
    fn from(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for bt_hci::param::BdAddr {
    fn from(addr: BluetoothAddress) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl TryFrom<&[u8]> for BluetoothAddress {
    type Error = DongleError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let addr: [u8; BD_ADDR_LENGTH] = bytes
            .try_into()
            .map_err(|_| DongleError::InvalidParameter)?;
        Ok(Self(addr))
    }
}

impl TryFrom<bt_hci::param::BdAddr> for BluetoothAddress {
    type Error = DongleError;

    fn try_from(bd_addr: bt_hci::param::BdAddr) -> Result<Self, Self::Error> {
        bd_addr.raw().try_into()
    }
}
