#![warn(missing_docs)]
#![warn(unused_extern_crates)]

//! A simple facade over the host bluetooth stack. It registers receivers for adapter state,
//! pairing and connection events and relays them to a [`SimpleBluetoothListener`], and it
//! manages a single rfcomm data connection through the [`BluetoothUtility`].
//!
//! Linux support is built on bluez through `bluer`, android support on the platform
//! bluetooth apis through `jni`.

mod backend;
mod bluetooth_uuid;
mod device;
mod error;
mod events;
mod handler;
mod listener;
mod payload;
mod settings;
mod simple;
mod stream;
mod utility;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::BluezBackend;

#[cfg(target_os = "android")]
mod android;
#[cfg(target_os = "android")]
pub use android::AndroidBackend;

pub use backend::{BluetoothBackend, RfcommListener, RfcommSocket};
pub use bluetooth_uuid::BluetoothUuid;
pub use device::{BluetoothAddress, BluetoothDevice};
pub use error::{BluetoothError, Result};
pub use events::{EventCallback, ReceiverId, ReceiverKind, SystemEvent};
pub use handler::{BluetoothHandler, DefaultBluetoothHandler, HandlerMessage};
pub use listener::SimpleBluetoothListener;
pub use payload::OutgoingData;
pub use settings::{
    DEFAULT_SERVER_NAME, DEFAULT_SERVER_UUID, MAX_READ_BUFFER_SIZE, SimpleBluetoothSettings,
};
pub use simple::SimpleBluetooth;
pub use stream::{InputDecoder, InputStreamType, LineDecoder, NormalDecoder, ReceivedData, StreamDecoder};
pub use utility::{BluetoothUtility, MAX_DISCOVERABLE_SECS};
