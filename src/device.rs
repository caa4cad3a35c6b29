//! Bluetooth device identity

use crate::error::BluetoothError;

/// A 48-bit bluetooth device address, most significant byte first
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// The all zero address
    pub const ANY: Self = Self([0; 6]);

    /// Construct an address from its raw bytes
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl std::str::FromStr for BluetoothAddress {
    type Err = BluetoothError;

    /// Accepts `AA:BB:CC:DD:EE:FF` in either case, `-` may be used instead of `:`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || BluetoothError::InvalidAddress(s.to_string());
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for b in bytes.iter_mut() {
            let part = parts.next().ok_or_else(bad)?;
            if part.len() != 2 || !part.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(bad());
            }
            *b = u8::from_str_radix(part, 16).map_err(|_| bad())?;
        }
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self(bytes))
    }
}

/// A remote bluetooth device as reported by the platform
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BluetoothDevice {
    /// The device address
    pub address: BluetoothAddress,
    /// The friendly name, when the platform knows it
    pub name: Option<String>,
}

impl BluetoothDevice {
    /// Construct a device with only an address
    pub fn new(address: BluetoothAddress) -> Self {
        Self {
            address,
            name: None,
        }
    }

    /// Construct a device with an address and a name
    pub fn named(address: BluetoothAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: Some(name.into()),
        }
    }

    /// The name if known, otherwise the address
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.address.to_string())
    }
}
