//! Relaying connection level messages to application code

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::device::BluetoothDevice;
use crate::listener::SimpleBluetoothListener;
use crate::stream::ReceivedData;

/// What the connection utility reports about sockets it manages
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerMessage {
    /// Data was read from the active connection
    DataRead(ReceivedData),
    /// A data connection is now active
    Connected(BluetoothDevice),
    /// A data connection attempt failed
    ConnectionFailed {
        /// The device, if it was known
        device: Option<BluetoothDevice>,
        /// Why it failed
        reason: String,
    },
    /// The remote end went away
    ConnectionLost(BluetoothDevice),
    /// The server socket is waiting for a client
    ServerListening,
}

/// Receives messages from the connection utility. Supply your own to take over how messages
/// are presented.
pub trait BluetoothHandler: Send + Sync {
    /// Handle one message
    fn handle_message(&self, message: HandlerMessage);

    /// Change whether user facing notifications are produced
    fn set_show_notifications(&self, _show: bool) {}

    /// The listener this handler reports to, if any
    fn listener(&self) -> Option<Arc<dyn SimpleBluetoothListener>> {
        None
    }
}

/// Forwards every message to a [`SimpleBluetoothListener`]
pub struct DefaultBluetoothHandler {
    listener: RwLock<Option<Arc<dyn SimpleBluetoothListener>>>,
    show_notifications: AtomicBool,
}

impl DefaultBluetoothHandler {
    /// Construct a handler reporting to the listener
    pub fn new(listener: Option<Arc<dyn SimpleBluetoothListener>>) -> Self {
        Self {
            listener: RwLock::new(listener),
            show_notifications: AtomicBool::new(false),
        }
    }

    /// Replace the listener
    pub fn set_listener(&self, listener: Option<Arc<dyn SimpleBluetoothListener>>) {
        if let Ok(mut l) = self.listener.write() {
            *l = listener;
        }
    }

    /// Whether notifications are currently produced
    pub fn shows_notifications(&self) -> bool {
        self.show_notifications.load(Ordering::Relaxed)
    }

    fn notify(&self, listener: &dyn SimpleBluetoothListener, message: &str) {
        if self.shows_notifications() {
            log::info!("{}", message);
            listener.on_notification(message);
        } else {
            log::debug!("{}", message);
        }
    }
}

impl BluetoothHandler for DefaultBluetoothHandler {
    fn handle_message(&self, message: HandlerMessage) {
        let Some(listener) = self.listener() else {
            log::debug!("No listener for {:?}", message);
            return;
        };
        match message {
            HandlerMessage::DataRead(data) => {
                listener.on_bluetooth_data_received(&data.bytes, &data.text);
            }
            HandlerMessage::Connected(device) => {
                self.notify(listener.as_ref(), &format!("Connected to {}", device.display_name()));
                listener.on_connection_established(&device);
            }
            HandlerMessage::ConnectionFailed { device, reason } => {
                self.notify(listener.as_ref(), "Connection failed");
                listener.on_connection_failed(device.as_ref(), &reason);
            }
            HandlerMessage::ConnectionLost(device) => {
                self.notify(
                    listener.as_ref(),
                    &format!("Connection to {} lost", device.display_name()),
                );
                listener.on_connection_lost(&device);
            }
            HandlerMessage::ServerListening => {
                self.notify(listener.as_ref(), "Waiting for a device to connect");
            }
        }
    }

    fn set_show_notifications(&self, show: bool) {
        self.show_notifications.store(show, Ordering::Relaxed);
    }

    fn listener(&self) -> Option<Arc<dyn SimpleBluetoothListener>> {
        self.listener.read().ok().and_then(|l| l.clone())
    }
}
