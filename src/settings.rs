//! Configuration for the facade and its connection utility

use std::path::Path;

use crate::bluetooth_uuid::BluetoothUuid;
use crate::error::Result;
use crate::stream::InputStreamType;

/// The service a server socket advertises unless configured otherwise
pub const DEFAULT_SERVER_UUID: &str = "fa87c0d0-afac-11de-8a39-0800200c9a66";

/// The name a server socket advertises unless configured otherwise
pub const DEFAULT_SERVER_NAME: &str = "SimpleBluetooth";

/// The largest socket read size accepted
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Settings for a [`crate::SimpleBluetooth`]
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SimpleBluetoothSettings {
    /// How received bytes are grouped
    pub input_stream_type: InputStreamType,
    /// Produce user facing notifications for connection changes
    pub show_notifications: bool,
    /// The service to connect to on remote devices
    pub device_uuid: BluetoothUuid,
    /// The service used between two instances of this library
    pub server_uuid: BluetoothUuid,
    /// The service name advertised by the server socket
    pub server_name: String,
    /// Require authenticated, encrypted links
    pub secure: bool,
    /// Size of each socket read
    pub read_buffer_size: usize,
}

impl Default for SimpleBluetoothSettings {
    fn default() -> Self {
        Self {
            input_stream_type: InputStreamType::Normal,
            show_notifications: false,
            device_uuid: BluetoothUuid::SPP,
            server_uuid: BluetoothUuid::Unknown(DEFAULT_SERVER_UUID.to_string()),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            secure: true,
            read_buffer_size: 1024,
        }
    }
}

impl SimpleBluetoothSettings {
    /// Parse settings from toml text, missing keys take their default
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let settings: Self = toml::from_str(s)?;
        settings.validated()
    }

    /// Render the settings as toml text
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Load settings from a toml file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Save settings to a toml file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_toml_string()?)?;
        Ok(())
    }

    fn validated(self) -> Result<Self> {
        if self.read_buffer_size == 0 {
            return Err(crate::BluetoothError::Config(
                "read_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(crate::BluetoothError::Config(format!(
                "read_buffer_size must be at most {}",
                MAX_READ_BUFFER_SIZE
            )));
        }
        Ok(self)
    }
}
