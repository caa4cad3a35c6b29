//! The simplified callback interface for application code

use crate::device::BluetoothDevice;

/// Receives bluetooth callbacks. Every method does nothing by default, implement the ones you
/// care about. Callbacks arrive on background threads.
pub trait SimpleBluetoothListener: Send + Sync {
    /// Data arrived from the connected device
    fn on_bluetooth_data_received(&self, _bytes: &[u8], _text: &str) {}
    /// The system reports a link to a device
    fn on_device_connected(&self, _device: &BluetoothDevice) {}
    /// The system reports a link to a device went away
    fn on_device_disconnected(&self, _device: &BluetoothDevice) {}
    /// Discovery started
    fn on_discovery_started(&self) {}
    /// Discovery finished
    fn on_discovery_finished(&self) {}
    /// A device was bonded
    fn on_device_paired(&self, _device: &BluetoothDevice) {}
    /// A device bond was removed
    fn on_device_unpaired(&self, _device: &BluetoothDevice) {}
    /// A scan found a device, only delivered after enabling found device events
    fn on_device_found(&self, _device: &BluetoothDevice) {}
    /// The adapter was turned on or off
    fn on_adapter_state_changed(&self, _enabled: bool) {}
    /// A data connection to the device is ready for sending
    fn on_connection_established(&self, _device: &BluetoothDevice) {}
    /// A data connection could not be made
    fn on_connection_failed(&self, _device: Option<&BluetoothDevice>, _reason: &str) {}
    /// The remote end closed the data connection
    fn on_connection_lost(&self, _device: &BluetoothDevice) {}
    /// A user facing status message, only when notifications are enabled
    fn on_notification(&self, _message: &str) {}
}
