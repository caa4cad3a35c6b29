//! Well known bluetooth service uuids

use crate::error::BluetoothError;

/// Represents the uuid for a bluetooth service. Values compare by their uuid text, so an
/// `Unknown` holding a well known uuid equals the named variant.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BluetoothUuid {
    /// Android auto
    AndroidAuto,
    /// Serial port protocol
    SPP,
    /// a2dp source
    A2dpSource,
    /// a2dp sink
    A2dpSink,
    /// base bluetooth profile
    Base,
    /// headset protocol, hs
    HspHs,
    /// headset protocol ag
    HspAg,
    /// handsfree protocol, ag
    HfpAg,
    /// Handsfree protocol, hs
    HfpHs,
    /// Obex opp protocol
    ObexOpp,
    /// Obex ftp protocol
    ObexFtp,
    /// Obex mas protocol
    ObexMas,
    /// Obex mns protocol
    ObexMns,
    /// Obex pse protocol
    ObexPse,
    /// Obex sync protocol
    ObexSync,
    /// Avrcp remote protocol
    AvrcpRemote,
    /// Network nap protocol for bluetooth networking
    NetworkingNap,
    /// Any other uuid, stored in lower case
    Unknown(String),
}

/// Every named variant with its canonical lower case text
static KNOWN: &[(BluetoothUuid, &str)] = &[
    (BluetoothUuid::SPP, "00001101-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::A2dpSource, "0000110a-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::HfpHs, "0000111e-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::ObexOpp, "00001105-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::ObexFtp, "00001106-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::ObexSync, "00001104-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::A2dpSink, "0000110b-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::AvrcpRemote, "0000110e-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::ObexPse, "0000112f-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::HfpAg, "0000111f-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::ObexMas, "00001132-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::ObexMns, "00001133-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::Base, "00000000-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::NetworkingNap, "00001116-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::HspHs, "00001108-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::HspAg, "00001112-0000-1000-8000-00805f9b34fb"),
    (BluetoothUuid::AndroidAuto, "4de17a00-52cb-11e6-bdf4-0800200c9a66"),
];

impl BluetoothUuid {
    /// Get the uuid as a str reference, always lower case
    pub fn as_str(&self) -> &str {
        if let BluetoothUuid::Unknown(s) = self {
            return s;
        }
        KNOWN
            .iter()
            .find(|(u, _)| std::mem::discriminant(u) == std::mem::discriminant(self))
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }

    /// Checks the `8-4-4-4-12` hex digit layout of a uuid string
    fn well_formed(s: &str) -> bool {
        let groups: Vec<&str> = s.split('-').collect();
        groups.len() == 5
            && groups
                .iter()
                .zip([8, 4, 4, 4, 12])
                .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

impl PartialEq for BluetoothUuid {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl Eq for BluetoothUuid {}

impl std::hash::Hash for BluetoothUuid {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for b in self.as_str().bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl std::fmt::Display for BluetoothUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BluetoothUuid {
    type Err = BluetoothError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if !Self::well_formed(&lower) {
            return Err(BluetoothError::InvalidUuid(s.to_string()));
        }
        Ok(KNOWN
            .iter()
            .find(|(_, text)| *text == lower)
            .map(|(u, _)| u.clone())
            .unwrap_or(BluetoothUuid::Unknown(lower)))
    }
}

impl TryFrom<String> for BluetoothUuid {
    type Error = BluetoothError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BluetoothUuid> for String {
    fn from(value: BluetoothUuid) -> Self {
        value.as_str().to_string()
    }
}
