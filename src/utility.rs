//! The connection utility: sockets, reader threads and the server socket

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::{BluetoothBackend, RfcommListener, RfcommSocket};
use crate::bluetooth_uuid::BluetoothUuid;
use crate::device::{BluetoothAddress, BluetoothDevice};
use crate::error::{BluetoothError, Result};
use crate::handler::{BluetoothHandler, HandlerMessage};
use crate::payload::OutgoingData;
use crate::settings::{MAX_READ_BUFFER_SIZE, SimpleBluetoothSettings};
use crate::stream::{InputStreamType, StreamDecoder};

/// The longest discoverable period the platforms accept, in seconds
pub const MAX_DISCOVERABLE_SECS: u32 = 3600;

/// The connection that data is currently sent on and read from
struct ActiveConnection {
    socket: Arc<dyn RfcommSocket>,
    /// Set when the connection is closed from this side
    closing: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// A server socket waiting for its single client
struct ServerState {
    listener: Arc<dyn RfcommListener>,
    closing: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

/// State shared with the reader and accept threads
struct UtilityInner {
    backend: Arc<dyn BluetoothBackend>,
    handler: Arc<dyn BluetoothHandler>,
    input_stream_type: Mutex<InputStreamType>,
    show_notifications: AtomicBool,
    device_uuid: BluetoothUuid,
    server_uuid: BluetoothUuid,
    server_name: String,
    secure: bool,
    read_buffer_size: usize,
    connection: Mutex<Option<ActiveConnection>>,
    server: Mutex<Option<ServerState>>,
}

/// Manages the sockets behind a [`crate::SimpleBluetooth`]. Only one data connection is
/// active at a time; starting a new one closes the previous one.
#[derive(Clone)]
pub struct BluetoothUtility {
    inner: Arc<UtilityInner>,
}

/// Join a worker thread unless it is the thread asking
fn join_worker(handle: JoinHandle<()>) {
    if handle.thread().id() != std::thread::current().id() {
        let _ = handle.join();
    }
}

impl BluetoothUtility {
    /// Construct a utility that reports to the handler
    pub fn new(
        backend: Arc<dyn BluetoothBackend>,
        handler: Arc<dyn BluetoothHandler>,
        settings: &SimpleBluetoothSettings,
    ) -> Self {
        Self {
            inner: Arc::new(UtilityInner {
                backend,
                handler,
                input_stream_type: Mutex::new(settings.input_stream_type),
                show_notifications: AtomicBool::new(settings.show_notifications),
                device_uuid: settings.device_uuid.clone(),
                server_uuid: settings.server_uuid.clone(),
                server_name: settings.server_name.clone(),
                secure: settings.secure,
                read_buffer_size: settings.read_buffer_size.clamp(1, MAX_READ_BUFFER_SIZE),
                connection: Mutex::new(None),
                server: Mutex::new(None),
            }),
        }
    }

    /// The handler messages are reported to
    pub fn handler(&self) -> &Arc<dyn BluetoothHandler> {
        &self.inner.handler
    }

    /// Set the stream type used for connections started from now on
    pub fn set_input_stream_type(&self, t: InputStreamType) {
        if let Ok(mut s) = self.inner.input_stream_type.lock() {
            *s = t;
        }
    }

    /// The stream type used for new connections
    pub fn input_stream_type(&self) -> InputStreamType {
        self.inner
            .input_stream_type
            .lock()
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Change whether notifications are produced
    pub fn set_should_show_notifications(&self, show: bool) {
        self.inner.show_notifications.store(show, Ordering::Relaxed);
        self.inner.handler.set_show_notifications(show);
    }

    /// Whether notifications are produced
    pub fn should_show_notifications(&self) -> bool {
        self.inner.show_notifications.load(Ordering::Relaxed)
    }

    /// Returns true when the adapter is on
    pub fn check_if_enabled(&self) -> bool {
        match self.inner.backend.is_enabled() {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Unable to query the bluetooth adapter: {}", e);
                false
            }
        }
    }

    /// Ask the user to turn the adapter on
    pub fn enable_bluetooth(&self) -> Result<()> {
        log::info!("Bluetooth not enabled. Requesting it to be enabled");
        self.inner.backend.request_enable(true)
    }

    /// Turn the adapter on without asking
    pub fn enable_bluetooth_silent(&self) -> Result<()> {
        log::info!("Bluetooth not enabled. Enabling it");
        self.inner.backend.request_enable(false)
    }

    /// Returns true while a data connection is active
    pub fn is_connected(&self) -> bool {
        self.inner
            .connection
            .lock()
            .map(|c| c.is_some())
            .unwrap_or(false)
    }

    /// The device of the active data connection
    pub fn connected_device(&self) -> Option<BluetoothDevice> {
        let c = self.inner.connection.lock().ok()?;
        c.as_ref().map(|c| c.socket.remote())
    }

    /// Write data to the active connection
    pub fn send_data(&self, data: impl Into<OutgoingData>) -> Result<()> {
        let socket = {
            let c = self
                .inner
                .connection
                .lock()
                .map_err(|_| BluetoothError::NotConnected)?;
            c.as_ref()
                .map(|c| c.socket.clone())
                .ok_or(BluetoothError::NotConnected)?
        };
        let bytes = data.into().into_bytes();
        log::debug!("Sending {} bytes to {}", bytes.len(), socket.remote().address);
        socket.write_all(&bytes)?;
        Ok(())
    }

    /// Start looking for nearby devices
    pub fn scan(&self) -> Result<()> {
        self.inner.backend.start_discovery()
    }

    /// Stop looking for nearby devices
    pub fn cancel_scan(&self) -> Result<()> {
        self.inner.backend.cancel_discovery()
    }

    /// Show the platform device picker
    pub fn show_device_picker(&self, request_code: i32) -> Result<()> {
        self.inner.backend.show_device_picker(request_code)
    }

    /// Connect to the configured device service on the device with the given address
    pub fn connect_device(&self, address: &str) -> Result<()> {
        let address: BluetoothAddress = address.parse().inspect_err(|e| {
            self.report_failure(None, e);
        })?;
        let uuid = self.inner.device_uuid.clone();
        self.connect_to(BluetoothDevice::new(address), &uuid)
    }

    /// Connect to the configured device service on a known device
    pub fn connect_bluetooth_device(&self, device: &BluetoothDevice) -> Result<()> {
        let uuid = self.inner.device_uuid.clone();
        self.connect_to(device.clone(), &uuid)
    }

    /// Connect to a server socket opened by another instance of this library
    pub fn connect_client_to_bluetooth_server(&self, address: &str) -> Result<()> {
        let address: BluetoothAddress = address.parse().inspect_err(|e| {
            self.report_failure(None, e);
        })?;
        let uuid = self.inner.server_uuid.clone();
        self.connect_to(BluetoothDevice::new(address), &uuid)
    }

    fn connect_to(&self, device: BluetoothDevice, uuid: &BluetoothUuid) -> Result<()> {
        log::info!("Connecting to {} for service {}", device.address, uuid);
        match self
            .inner
            .backend
            .connect_rfcomm(device.address, uuid, self.inner.secure)
        {
            Ok(socket) => {
                self.start_connection(Arc::from(socket));
                Ok(())
            }
            Err(e) => {
                self.report_failure(Some(device), &e);
                Err(e)
            }
        }
    }

    fn report_failure(&self, device: Option<BluetoothDevice>, e: &BluetoothError) {
        log::error!("Bluetooth connection failed: {}", e);
        self.inner.handler.handle_message(HandlerMessage::ConnectionFailed {
            device,
            reason: e.to_string(),
        });
    }

    /// Open a server socket and accept one client in the background
    pub fn create_bluetooth_server_socket(&self) -> Result<()> {
        self.close_server();
        let listener: Arc<dyn RfcommListener> = Arc::from(self.inner.backend.listen_rfcomm(
            &self.inner.server_uuid,
            &self.inner.server_name,
            self.inner.secure,
        )?);
        log::info!(
            "Listening for {} on {}",
            self.inner.server_name,
            self.inner.server_uuid
        );
        self.inner
            .handler
            .handle_message(HandlerMessage::ServerListening);
        let closing = Arc::new(AtomicBool::new(false));
        let utility = self.clone();
        let l2 = listener.clone();
        let c2 = closing.clone();
        let acceptor = std::thread::spawn(move || {
            let accepted = l2.accept();
            if let Err(e) = l2.close() {
                log::warn!("Error closing the server socket: {}", e);
            }
            match accepted {
                Ok(socket) if !c2.load(Ordering::SeqCst) => {
                    utility.start_connection(Arc::from(socket));
                }
                Ok(socket) => {
                    let _ = socket.close();
                }
                Err(e) => {
                    if !c2.load(Ordering::SeqCst) {
                        utility.report_failure(None, &e);
                    }
                }
            }
        });
        if let Ok(mut s) = self.inner.server.lock() {
            *s = Some(ServerState {
                listener,
                closing,
                acceptor: Some(acceptor),
            });
        }
        Ok(())
    }

    /// Returns true while a server socket is waiting for a client
    pub fn is_listening(&self) -> bool {
        self.inner
            .server
            .lock()
            .map(|s| {
                s.as_ref()
                    .and_then(|s| s.acceptor.as_ref())
                    .is_some_and(|a| !a.is_finished())
            })
            .unwrap_or(false)
    }

    /// Make the socket the active connection and start reading from it
    fn start_connection(&self, socket: Arc<dyn RfcommSocket>) {
        self.close_connection();
        let device = socket.remote();
        let closing = Arc::new(AtomicBool::new(false));
        if let Ok(mut slot) = self.inner.connection.lock() {
            *slot = Some(ActiveConnection {
                socket: socket.clone(),
                closing: closing.clone(),
                reader: None,
            });
        }
        self.inner
            .handler
            .handle_message(HandlerMessage::Connected(device.clone()));

        let mut decoder = self.input_stream_type().decoder();
        let buffer_size = self.inner.read_buffer_size;
        let utility = self.clone();
        let s2 = socket.clone();
        let reader = std::thread::spawn(move || {
            let handler = utility.inner.handler.clone();
            let mut buf = vec![0u8; buffer_size];
            loop {
                match s2.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for data in decoder.feed(&buf[..n]) {
                            handler.handle_message(HandlerMessage::DataRead(data));
                        }
                    }
                    Err(e) => {
                        if !closing.load(Ordering::SeqCst) {
                            log::warn!("Read from {} failed: {}", device.address, e);
                        }
                        break;
                    }
                }
            }
            if let Some(data) = decoder.finish() {
                handler.handle_message(HandlerMessage::DataRead(data));
            }
            if !closing.load(Ordering::SeqCst) {
                utility.connection_lost(&s2);
                handler.handle_message(HandlerMessage::ConnectionLost(device));
            }
        });

        if let Ok(mut slot) = self.inner.connection.lock() {
            if let Some(c) = slot.as_mut().filter(|c| Arc::ptr_eq(&c.socket, &socket)) {
                c.reader = Some(reader);
            }
        }
    }

    /// Drop the connection from the slot if it is still the active one
    fn connection_lost(&self, socket: &Arc<dyn RfcommSocket>) {
        let stale = match self.inner.connection.lock() {
            Ok(mut slot) => {
                if slot
                    .as_ref()
                    .is_some_and(|c| Arc::ptr_eq(&c.socket, socket))
                {
                    slot.take()
                } else {
                    None
                }
            }
            Err(_) => None,
        };
        if let Some(c) = stale {
            let _ = c.socket.close();
        }
    }

    /// Find a bonded device by its friendly name
    pub fn find_device_by_name(&self, name: &str) -> Result<BluetoothDevice> {
        self.inner
            .backend
            .bonded_devices()?
            .into_iter()
            .find(|d| d.name.as_deref() == Some(name))
            .ok_or_else(|| BluetoothError::DeviceNotFound(name.to_string()))
    }

    /// Connect the a2dp audio profile of a device
    pub fn set_up_a2dp_connection(&self, device: &BluetoothDevice) -> Result<()> {
        log::info!("Connecting a2dp to {}", device.display_name());
        self.inner
            .backend
            .connect_profile(device, &BluetoothUuid::A2dpSink)
    }

    /// Make this device discoverable, zero seconds meaning no time limit
    pub fn enable_discovery(&self, seconds: u32) -> Result<()> {
        let seconds = if seconds > MAX_DISCOVERABLE_SECS {
            log::warn!(
                "Discoverable duration {} clamped to {}",
                seconds,
                MAX_DISCOVERABLE_SECS
            );
            MAX_DISCOVERABLE_SECS
        } else {
            seconds
        };
        self.inner
            .backend
            .set_discoverable(Duration::from_secs(seconds as u64))
    }

    fn close_connection(&self) {
        let active = self.inner.connection.lock().ok().and_then(|mut c| {
            if let Some(a) = c.as_ref() {
                a.closing.store(true, Ordering::SeqCst);
            }
            c.take()
        });
        if let Some(mut c) = active {
            if let Err(e) = c.socket.close() {
                log::warn!("Error closing the bluetooth socket: {}", e);
            }
            if let Some(r) = c.reader.take() {
                join_worker(r);
            }
        }
    }

    fn close_server(&self) {
        let server = self.inner.server.lock().ok().and_then(|mut s| s.take());
        if let Some(mut s) = server {
            s.closing.store(true, Ordering::SeqCst);
            if let Err(e) = s.listener.close() {
                log::warn!("Error closing the server socket: {}", e);
            }
            if let Some(a) = s.acceptor.take() {
                join_worker(a);
            }
        }
    }

    /// Stop discovery and close the server socket and the active connection
    pub fn close_connections(&self) {
        if let Err(e) = self.inner.backend.cancel_discovery() {
            log::debug!("Cancel discovery while closing: {}", e);
        }
        self.close_server();
        self.close_connection();
    }
}
