//! System level bluetooth notifications and the receivers that deliver them

use std::sync::Arc;

use crate::device::BluetoothDevice;

/// A notification delivered by the host bluetooth stack
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SystemEvent {
    /// The adapter was turned on
    AdapterEnabled,
    /// The adapter was turned off
    AdapterDisabled,
    /// A link to the device was established
    DeviceConnected(BluetoothDevice),
    /// The link to the device went away
    DeviceDisconnected(BluetoothDevice),
    /// The adapter started looking for devices
    DiscoveryStarted,
    /// The adapter stopped looking for devices
    DiscoveryFinished,
    /// The device is now bonded
    DevicePaired(BluetoothDevice),
    /// The device is no longer bonded
    DeviceUnpaired(BluetoothDevice),
    /// A scan found the device
    DeviceFound(BluetoothDevice),
}

/// The groups of system events a receiver can be registered for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ReceiverKind {
    /// Adapter on / off changes
    AdapterState,
    /// Bond state changes
    Pairing,
    /// Link connect / disconnect and discovery start / finish
    Connection,
    /// Devices found while scanning
    FoundDevice,
}

impl ReceiverKind {
    /// The receivers registered by every facade
    pub const DEFAULT_SET: [ReceiverKind; 3] = [
        ReceiverKind::AdapterState,
        ReceiverKind::Pairing,
        ReceiverKind::Connection,
    ];

    /// Returns true when a receiver of this kind delivers the event
    pub fn accepts(&self, event: &SystemEvent) -> bool {
        use SystemEvent::*;
        match self {
            ReceiverKind::AdapterState => matches!(event, AdapterEnabled | AdapterDisabled),
            ReceiverKind::Pairing => matches!(event, DevicePaired(_) | DeviceUnpaired(_)),
            ReceiverKind::Connection => matches!(
                event,
                DeviceConnected(_) | DeviceDisconnected(_) | DiscoveryStarted | DiscoveryFinished
            ),
            ReceiverKind::FoundDevice => matches!(event, DeviceFound(_)),
        }
    }

    /// The android intent actions that make up the receiver's filter
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            ReceiverKind::AdapterState => &["android.bluetooth.adapter.action.STATE_CHANGED"],
            ReceiverKind::Pairing => &["android.bluetooth.device.action.BOND_STATE_CHANGED"],
            ReceiverKind::Connection => &[
                "android.bluetooth.device.action.ACL_CONNECTED",
                "android.bluetooth.device.action.ACL_DISCONNECTED",
                "android.bluetooth.adapter.action.DISCOVERY_STARTED",
                "android.bluetooth.adapter.action.DISCOVERY_FINISHED",
            ],
            ReceiverKind::FoundDevice => &["android.bluetooth.device.action.FOUND"],
        }
    }
}

/// Identifies a registered receiver so it can be unregistered later
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiverId(pub u64);

/// The callback invoked for every event a receiver delivers
pub type EventCallback = Arc<dyn Fn(SystemEvent) + Send + Sync + 'static>;
