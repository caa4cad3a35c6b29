//! Errors produced by the library

/// Everything that can go wrong while talking to the bluetooth stack
#[derive(Debug, thiserror::Error)]
pub enum BluetoothError {
    /// A required argument was missing or malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A connection, send or scan was attempted before initialization completed
    #[error("Must initialize before using any other method in SimpleBluetooth! Call initialize()")]
    NotInitialized,
    /// There is no active connection to send data on
    #[error("not connected to a bluetooth device")]
    NotConnected,
    /// The text is not a valid bluetooth address
    #[error("invalid bluetooth address `{0}`")]
    InvalidAddress(String),
    /// The text is not a valid uuid
    #[error("invalid uuid `{0}`")]
    InvalidUuid(String),
    /// No device matched the request
    #[error("bluetooth device not found: {0}")]
    DeviceNotFound(String),
    /// The host has no usable bluetooth adapter
    #[error("no bluetooth adapter available")]
    AdapterUnavailable,
    /// The platform cannot perform the operation
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
    /// The platform bluetooth stack reported an error
    #[error("bluetooth stack error: {0}")]
    Platform(String),
    /// The settings could not be loaded or saved
    #[error("configuration error: {0}")]
    Config(String),
    /// Socket level io failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type used across the library
pub type Result<T, E = BluetoothError> = std::result::Result<T, E>;

impl From<toml::de::Error> for BluetoothError {
    fn from(value: toml::de::Error) -> Self {
        BluetoothError::Config(value.to_string())
    }
}

impl From<toml::ser::Error> for BluetoothError {
    fn from(value: toml::ser::Error) -> Self {
        BluetoothError::Config(value.to_string())
    }
}
