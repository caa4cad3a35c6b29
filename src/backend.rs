//! The seams between the library and the host bluetooth stack

use std::time::Duration;

use crate::bluetooth_uuid::BluetoothUuid;
use crate::device::{BluetoothAddress, BluetoothDevice};
use crate::error::Result;
use crate::events::{EventCallback, ReceiverId, ReceiverKind};

/// The host platform's bluetooth stack. All methods block until the platform answers.
pub trait BluetoothBackend: Send + Sync {
    /// Returns true when the adapter is turned on
    fn is_enabled(&self) -> Result<bool>;

    /// Ask for the adapter to be turned on, optionally asking the user first
    fn request_enable(&self, prompt_user: bool) -> Result<()>;

    /// Start delivering events of the given kind to the callback
    fn register_receiver(&self, kind: ReceiverKind, callback: EventCallback) -> Result<ReceiverId>;

    /// Stop delivering events to a receiver
    fn unregister_receiver(&self, id: ReceiverId) -> Result<()>;

    /// Start looking for nearby devices
    fn start_discovery(&self) -> Result<()>;

    /// Stop looking for nearby devices
    fn cancel_discovery(&self) -> Result<()>;

    /// Show the platform's device picker, the result comes back under `request_code`
    fn show_device_picker(&self, request_code: i32) -> Result<()>;

    /// Make the adapter visible to other devices for a while, zero meaning no time limit
    fn set_discoverable(&self, duration: Duration) -> Result<()>;

    /// All devices bonded to the adapter
    fn bonded_devices(&self) -> Result<Vec<BluetoothDevice>>;

    /// Open an rfcomm connection to the service on the remote device
    fn connect_rfcomm(
        &self,
        address: BluetoothAddress,
        uuid: &BluetoothUuid,
        secure: bool,
    ) -> Result<Box<dyn RfcommSocket>>;

    /// Advertise an rfcomm service and wait for clients
    fn listen_rfcomm(
        &self,
        uuid: &BluetoothUuid,
        name: &str,
        secure: bool,
    ) -> Result<Box<dyn RfcommListener>>;

    /// Connect a profile handled by the platform itself, like a2dp
    fn connect_profile(&self, device: &BluetoothDevice, profile: &BluetoothUuid) -> Result<()>;
}

/// A connected rfcomm socket. Reading and writing may happen from different threads at once.
pub trait RfcommSocket: Send + Sync {
    /// The device at the other end
    fn remote(&self) -> BluetoothDevice;

    /// Block until data arrives. `Ok(0)` means the remote end closed the connection.
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write the whole buffer
    fn write_all(&self, data: &[u8]) -> std::io::Result<()>;

    /// Close the socket, unblocking any pending read
    fn close(&self) -> std::io::Result<()>;
}

/// A listening rfcomm server socket
pub trait RfcommListener: Send + Sync {
    /// Block until a client connects
    fn accept(&self) -> Result<Box<dyn RfcommSocket>>;

    /// Stop listening, unblocking any pending accept
    fn close(&self) -> Result<()>;
}
