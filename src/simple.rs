//! The facade application code talks to

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::backend::BluetoothBackend;
use crate::device::BluetoothDevice;
use crate::error::{BluetoothError, Result};
use crate::events::{EventCallback, ReceiverId, ReceiverKind, SystemEvent};
use crate::handler::{BluetoothHandler, DefaultBluetoothHandler};
use crate::listener::SimpleBluetoothListener;
use crate::payload::OutgoingData;
use crate::settings::SimpleBluetoothSettings;
use crate::stream::InputStreamType;
use crate::utility::BluetoothUtility;

/// State the receiver callbacks need
struct FacadeState {
    initialized: AtomicBool,
    ended: AtomicBool,
    listener: RwLock<Option<Arc<dyn SimpleBluetoothListener>>>,
}

impl FacadeState {
    fn listener(&self) -> Option<Arc<dyn SimpleBluetoothListener>> {
        self.listener.read().ok().and_then(|l| l.clone())
    }

    /// Relay one receiver event to the listener
    fn dispatch(&self, event: SystemEvent) {
        if self.ended.load(Ordering::SeqCst) {
            return;
        }
        match &event {
            SystemEvent::AdapterEnabled => {
                log::info!("Bluetooth adapter enabled");
                self.initialized.store(true, Ordering::SeqCst);
            }
            SystemEvent::AdapterDisabled => {
                log::info!("Bluetooth adapter disabled");
                self.initialized.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
        let Some(l) = self.listener() else {
            return;
        };
        match event {
            SystemEvent::AdapterEnabled => l.on_adapter_state_changed(true),
            SystemEvent::AdapterDisabled => l.on_adapter_state_changed(false),
            SystemEvent::DeviceConnected(d) => l.on_device_connected(&d),
            SystemEvent::DeviceDisconnected(d) => l.on_device_disconnected(&d),
            SystemEvent::DiscoveryStarted => l.on_discovery_started(),
            SystemEvent::DiscoveryFinished => l.on_discovery_finished(),
            SystemEvent::DevicePaired(d) => l.on_device_paired(&d),
            SystemEvent::DeviceUnpaired(d) => l.on_device_unpaired(&d),
            SystemEvent::DeviceFound(d) => l.on_device_found(&d),
        }
    }
}

/// Sets up and manages bluetooth connections. Construct it, call [`SimpleBluetooth::initialize`],
/// then scan, connect and send. Call [`SimpleBluetooth::end`] (or drop it) when finished.
pub struct SimpleBluetooth {
    backend: Arc<dyn BluetoothBackend>,
    state: Arc<FacadeState>,
    utility: BluetoothUtility,
    /// Present when the facade built its own handler
    default_handler: Option<Arc<DefaultBluetoothHandler>>,
    receivers: Mutex<Vec<ReceiverId>>,
    a2dp_device: Mutex<Option<BluetoothDevice>>,
}

impl SimpleBluetooth {
    /// Construct a facade reporting to the listener, with default settings
    pub fn new(
        backend: Arc<dyn BluetoothBackend>,
        listener: Arc<dyn SimpleBluetoothListener>,
    ) -> Self {
        Self::with_settings(backend, listener, SimpleBluetoothSettings::default())
    }

    /// Construct a facade reporting to the listener
    pub fn with_settings(
        backend: Arc<dyn BluetoothBackend>,
        listener: Arc<dyn SimpleBluetoothListener>,
        settings: SimpleBluetoothSettings,
    ) -> Self {
        let handler = Arc::new(DefaultBluetoothHandler::new(Some(listener.clone())));
        handler.set_show_notifications(settings.show_notifications);
        let utility = BluetoothUtility::new(backend.clone(), handler.clone(), &settings);
        Self::build(backend, Some(listener), utility, Some(handler))
    }

    /// Construct a facade whose connection messages go to a custom handler, with default
    /// settings. Fails when no handler is given.
    pub fn with_handler(
        backend: Arc<dyn BluetoothBackend>,
        handler: Option<Arc<dyn BluetoothHandler>>,
    ) -> Result<Self> {
        Self::with_handler_and_settings(backend, handler, SimpleBluetoothSettings::default())
    }

    /// Construct a facade whose connection messages go to a custom handler
    pub fn with_handler_and_settings(
        backend: Arc<dyn BluetoothBackend>,
        handler: Option<Arc<dyn BluetoothHandler>>,
        settings: SimpleBluetoothSettings,
    ) -> Result<Self> {
        let handler = handler.ok_or_else(|| {
            BluetoothError::InvalidArgument("Custom BluetoothHandler cannot be null!".to_string())
        })?;
        handler.set_show_notifications(settings.show_notifications);
        let listener = handler.listener();
        let utility = BluetoothUtility::new(backend.clone(), handler, &settings);
        Ok(Self::build(backend, listener, utility, None))
    }

    fn build(
        backend: Arc<dyn BluetoothBackend>,
        listener: Option<Arc<dyn SimpleBluetoothListener>>,
        utility: BluetoothUtility,
        default_handler: Option<Arc<DefaultBluetoothHandler>>,
    ) -> Self {
        let s = Self {
            backend,
            state: Arc::new(FacadeState {
                initialized: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                listener: RwLock::new(listener),
            }),
            utility,
            default_handler,
            receivers: Mutex::new(Vec::new()),
            a2dp_device: Mutex::new(None),
        };
        for kind in ReceiverKind::DEFAULT_SET {
            s.register(kind);
        }
        s
    }

    /// Register a receiver whose events go to the listener, logging failures
    fn register(&self, kind: ReceiverKind) -> Option<ReceiverId> {
        let weak: Weak<FacadeState> = Arc::downgrade(&self.state);
        let callback: EventCallback = Arc::new(move |event| {
            if let Some(state) = weak.upgrade() {
                state.dispatch(event);
            }
        });
        match self.backend.register_receiver(kind, callback) {
            Ok(id) => {
                log::debug!("Registered {:?} receiver {:?}", kind, id);
                if let Ok(mut r) = self.receivers.lock() {
                    r.push(id);
                }
                Some(id)
            }
            Err(e) => {
                log::warn!("Unable to register the {:?} receiver: {}", kind, e);
                None
            }
        }
    }

    fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(BluetoothError::NotInitialized)
        }
    }

    /// Replace the listener receiving callbacks
    pub fn set_listener(&self, listener: Option<Arc<dyn SimpleBluetoothListener>>) {
        if let Some(h) = &self.default_handler {
            h.set_listener(listener.clone());
        }
        if let Ok(mut l) = self.state.listener.write() {
            *l = listener;
        }
    }

    /// Set how data read from connections is grouped, applies to new connections
    pub fn set_input_stream_type(&self, t: InputStreamType) {
        self.utility.set_input_stream_type(t);
    }

    /// Set whether user facing notifications are produced
    pub fn set_show_notifications(&self, show: bool) {
        self.utility.set_should_show_notifications(show);
    }

    /// Must be called before connecting. Returns true when the adapter is on. Otherwise the
    /// user is asked to turn it on, initialization then completes when it is.
    pub fn initialize(&self) -> Result<bool> {
        self.initialize_with(true)
    }

    /// Like [`SimpleBluetooth::initialize`], but turns the adapter on without asking
    pub fn initialize_silent(&self) -> Result<bool> {
        self.initialize_with(false)
    }

    fn initialize_with(&self, prompt: bool) -> Result<bool> {
        if self.utility.check_if_enabled() {
            self.state.initialized.store(true, Ordering::SeqCst);
        } else if prompt {
            self.utility.enable_bluetooth()?;
        } else {
            self.utility.enable_bluetooth_silent()?;
        }
        Ok(self.is_initialized())
    }

    /// Returns true once initialization completed
    pub fn is_initialized(&self) -> bool {
        self.state.initialized.load(Ordering::SeqCst)
    }

    /// Send data to the connected device
    pub fn send_data(&self, data: impl Into<OutgoingData>) -> Result<()> {
        self.require_initialized()?;
        self.utility.send_data(data)
    }

    /// Show the platform device picker, the chosen device comes back under `request_code`
    pub fn scan_with_picker(&self, request_code: i32) -> Result<()> {
        self.require_initialized()?;
        self.utility.show_device_picker(request_code)
    }

    /// Scan for devices without any ui. Found devices are only reported after
    /// [`SimpleBluetooth::enable_found_device_events`].
    pub fn scan(&self) -> Result<()> {
        self.require_initialized()?;
        self.utility.scan()
    }

    /// Cancel a scan started by [`SimpleBluetooth::scan`]
    pub fn cancel_scan(&self) -> Result<()> {
        self.utility.cancel_scan()
    }

    /// Report devices found while scanning to [`SimpleBluetoothListener::on_device_found`]
    pub fn enable_found_device_events(&self) -> Result<()> {
        // held until the id is recorded, so a concurrent end waits for it
        let mut receivers = self
            .receivers
            .lock()
            .map_err(|_| BluetoothError::Platform("receiver list poisoned".to_string()))?;
        if self.state.ended.load(Ordering::SeqCst) {
            return Err(BluetoothError::NotInitialized);
        }
        let weak = Arc::downgrade(&self.state);
        let callback: EventCallback = Arc::new(move |event| {
            if let Some(state) = weak.upgrade() {
                state.dispatch(event);
            }
        });
        let id = self
            .backend
            .register_receiver(ReceiverKind::FoundDevice, callback)?;
        receivers.push(id);
        Ok(())
    }

    /// Connect to a device knowing only its address
    pub fn connect_to_bluetooth_device(&self, address: &str) -> Result<()> {
        self.require_initialized()?;
        self.utility.connect_device(address)
    }

    /// Connect to a device
    pub fn connect_to_device(&self, device: &BluetoothDevice) -> Result<()> {
        self.require_initialized()?;
        self.utility.connect_bluetooth_device(device)
    }

    /// Open a server socket on this device and wait for one client to connect
    pub fn create_bluetooth_server_connection(&self) -> Result<()> {
        self.require_initialized()?;
        self.utility.create_bluetooth_server_socket()
    }

    /// Connect to a server socket opened on another device
    pub fn connect_to_bluetooth_server(&self, address: &str) -> Result<()> {
        self.require_initialized()?;
        self.utility.connect_client_to_bluetooth_server(address)
    }

    /// Connect to an a2dp audio device by its bonded name
    pub fn connect_to_a2dp_device(&self, device_name: &str) -> Result<()> {
        self.require_initialized()?;
        let device = self.utility.find_device_by_name(device_name)?;
        if let Ok(mut a) = self.a2dp_device.lock() {
            *a = Some(device.clone());
        }
        self.utility.set_up_a2dp_connection(&device)
    }

    /// The device of the last a2dp connection attempt
    pub fn a2dp_device(&self) -> Option<BluetoothDevice> {
        self.a2dp_device.lock().ok().and_then(|a| a.clone())
    }

    /// Make this device discoverable for a number of seconds
    pub fn make_discoverable(&self, seconds: u32) -> Result<()> {
        self.utility.enable_discovery(seconds)
    }

    /// Unregister all receivers and close every connection. Calling it again does nothing.
    pub fn end(&self) {
        if self.state.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<ReceiverId> = self
            .receivers
            .lock()
            .map(|mut r| r.drain(..).collect())
            .unwrap_or_default();
        for id in ids {
            if let Err(e) = self.backend.unregister_receiver(id) {
                log::warn!("Unable to unregister receiver {:?}: {}", id, e);
            }
        }
        self.utility.close_connections();
        log::debug!("SimpleBluetooth ended");
    }

    /// The connection utility used by this facade
    pub fn utility(&self) -> &BluetoothUtility {
        &self.utility
    }
}

impl Drop for SimpleBluetooth {
    fn drop(&mut self) {
        self.end();
    }
}
