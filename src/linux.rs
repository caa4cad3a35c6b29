//! Linux specific bluetooth code, built on bluez

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bluer::rfcomm::stream::{OwnedReadHalf, OwnedWriteHalf};
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::{AdapterEvent, AdapterProperty, DeviceEvent, DeviceProperty};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::backend::{BluetoothBackend, RfcommListener, RfcommSocket};
use crate::bluetooth_uuid::BluetoothUuid;
use crate::device::{BluetoothAddress, BluetoothDevice};
use crate::error::{BluetoothError, Result};
use crate::events::{EventCallback, ReceiverId, ReceiverKind, SystemEvent};

/// How long an outgoing rfcomm connection may take
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

impl From<bluer::Error> for BluetoothError {
    fn from(value: bluer::Error) -> Self {
        BluetoothError::Platform(value.to_string())
    }
}

impl From<bluer::Address> for BluetoothAddress {
    fn from(value: bluer::Address) -> Self {
        BluetoothAddress(value.0)
    }
}

impl From<BluetoothAddress> for bluer::Address {
    fn from(value: BluetoothAddress) -> Self {
        bluer::Address::new(value.0)
    }
}

fn to_bluer_uuid(uuid: &BluetoothUuid) -> Result<bluer::Uuid> {
    bluer::Uuid::parse_str(uuid.as_str())
        .map_err(|_| BluetoothError::InvalidUuid(uuid.to_string()))
}

async fn describe(device: &bluer::Device) -> BluetoothDevice {
    BluetoothDevice {
        address: device.address().into(),
        name: device.name().await.ok().flatten(),
    }
}

/// Runs the receiver callback on a plain thread, so the callback may block on the backend
fn spawn_dispatcher(callback: EventCallback) -> std::sync::mpsc::Sender<SystemEvent> {
    let (tx, rx) = std::sync::mpsc::channel::<SystemEvent>();
    std::thread::spawn(move || {
        for event in rx {
            callback(event);
        }
    });
    tx
}

/// The bluez backed bluetooth handler for the library. There should be only one per
/// application on linux.
pub struct BluezBackend {
    runtime: tokio::runtime::Runtime,
    session: bluer::Session,
    adapter: bluer::Adapter,
    next_receiver: AtomicU64,
    receivers: Mutex<HashMap<ReceiverId, JoinHandle<()>>>,
    discovery: Mutex<Option<JoinHandle<()>>>,
    found: broadcast::Sender<BluetoothDevice>,
}

impl BluezBackend {
    /// Construct a new self using the default adapter
    pub fn new() -> Result<Self> {
        Self::with_adapter(None)
    }

    /// Construct a new self using the named adapter, like `hci0`
    pub fn with_adapter(name: Option<&str>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("simple-bluetooth")
            .build()?;
        let (session, adapter) = runtime.block_on(async {
            let session = bluer::Session::new().await?;
            let adapter = match name {
                Some(n) => session.adapter(n)?,
                None => session.default_adapter().await?,
            };
            Ok::<_, bluer::Error>((session, adapter))
        })?;
        log::info!("Using bluetooth adapter {}", adapter.name());
        let (found, _) = broadcast::channel(32);
        Ok(Self {
            runtime,
            session,
            adapter,
            next_receiver: AtomicU64::new(1),
            receivers: Mutex::new(HashMap::new()),
            discovery: Mutex::new(None),
            found,
        })
    }

    /// Retrieve the address of the adapter in use
    pub fn address(&self) -> Result<BluetoothAddress> {
        Ok(self.runtime.block_on(self.adapter.address())?.into())
    }
}

/// Follows adapter properties and, for pairing and connection receivers, every device
async fn watch_adapter(
    adapter: bluer::Adapter,
    kind: ReceiverKind,
    tx: std::sync::mpsc::Sender<SystemEvent>,
) -> bluer::Result<()> {
    let events = adapter.events().await?;
    futures::pin_mut!(events);
    let mut watchers = JoinSet::new();
    let per_device = matches!(kind, ReceiverKind::Pairing | ReceiverKind::Connection);
    if per_device {
        for addr in adapter.device_addresses().await? {
            spawn_device_watch(&mut watchers, &adapter, addr, kind, &tx);
        }
    }
    while let Some(event) = events.next().await {
        let out = match event {
            AdapterEvent::PropertyChanged(AdapterProperty::Powered(on))
                if kind == ReceiverKind::AdapterState =>
            {
                Some(if on {
                    SystemEvent::AdapterEnabled
                } else {
                    SystemEvent::AdapterDisabled
                })
            }
            AdapterEvent::PropertyChanged(AdapterProperty::Discovering(d))
                if kind == ReceiverKind::Connection =>
            {
                Some(if d {
                    SystemEvent::DiscoveryStarted
                } else {
                    SystemEvent::DiscoveryFinished
                })
            }
            AdapterEvent::DeviceAdded(addr) if per_device => {
                spawn_device_watch(&mut watchers, &adapter, addr, kind, &tx);
                None
            }
            _ => None,
        };
        if let Some(e) = out {
            if tx.send(e).is_err() {
                break;
            }
        }
    }
    Ok(())
}

fn spawn_device_watch(
    watchers: &mut JoinSet<()>,
    adapter: &bluer::Adapter,
    addr: bluer::Address,
    kind: ReceiverKind,
    tx: &std::sync::mpsc::Sender<SystemEvent>,
) {
    let device = match adapter.device(addr) {
        Ok(d) => d,
        Err(e) => {
            log::warn!("Unable to watch device {}: {}", addr, e);
            return;
        }
    };
    let tx = tx.clone();
    watchers.spawn(async move {
        if let Err(e) = watch_device(device, kind, tx).await {
            log::debug!("Stopped watching {}: {}", addr, e);
        }
    });
}

async fn watch_device(
    device: bluer::Device,
    kind: ReceiverKind,
    tx: std::sync::mpsc::Sender<SystemEvent>,
) -> bluer::Result<()> {
    let events = device.events().await?;
    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        let out = match (kind, event) {
            (
                ReceiverKind::Connection,
                DeviceEvent::PropertyChanged(DeviceProperty::Connected(c)),
            ) => {
                let d = describe(&device).await;
                Some(if c {
                    SystemEvent::DeviceConnected(d)
                } else {
                    SystemEvent::DeviceDisconnected(d)
                })
            }
            (ReceiverKind::Pairing, DeviceEvent::PropertyChanged(DeviceProperty::Paired(p))) => {
                let d = describe(&device).await;
                Some(if p {
                    SystemEvent::DevicePaired(d)
                } else {
                    SystemEvent::DeviceUnpaired(d)
                })
            }
            _ => None,
        };
        if let Some(e) = out {
            if tx.send(e).is_err() {
                break;
            }
        }
    }
    Ok(())
}

impl BluetoothBackend for BluezBackend {
    fn is_enabled(&self) -> Result<bool> {
        Ok(self.runtime.block_on(self.adapter.is_powered())?)
    }

    fn request_enable(&self, prompt_user: bool) -> Result<()> {
        if prompt_user {
            log::info!("No enable prompt on linux, powering the adapter directly");
        }
        self.runtime.block_on(async {
            self.adapter.set_powered(true).await?;
            self.adapter.set_pairable(true).await
        })?;
        Ok(())
    }

    fn register_receiver(&self, kind: ReceiverKind, callback: EventCallback) -> Result<ReceiverId> {
        let id = ReceiverId(self.next_receiver.fetch_add(1, Ordering::Relaxed));
        let tx = spawn_dispatcher(callback);
        let task = match kind {
            ReceiverKind::FoundDevice => {
                let mut found = self.found.subscribe();
                self.runtime.spawn(async move {
                    loop {
                        match found.recv().await {
                            Ok(dev) => {
                                if tx.send(SystemEvent::DeviceFound(dev)).is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Found device receiver skipped {} devices", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                })
            }
            _ => {
                let adapter = self.adapter.clone();
                self.runtime.spawn(async move {
                    if let Err(e) = watch_adapter(adapter, kind, tx).await {
                        log::error!("The {:?} receiver stopped: {}", kind, e);
                    }
                })
            }
        };
        self.receivers
            .lock()
            .map_err(|_| BluetoothError::Platform("receiver table poisoned".to_string()))?
            .insert(id, task);
        Ok(id)
    }

    fn unregister_receiver(&self, id: ReceiverId) -> Result<()> {
        let task = self
            .receivers
            .lock()
            .map_err(|_| BluetoothError::Platform("receiver table poisoned".to_string()))?
            .remove(&id);
        match task {
            Some(t) => {
                t.abort();
                Ok(())
            }
            None => Err(BluetoothError::InvalidArgument(format!(
                "receiver {:?} is not registered",
                id
            ))),
        }
    }

    fn start_discovery(&self) -> Result<()> {
        if !self.runtime.block_on(self.adapter.is_powered())? {
            return Err(BluetoothError::AdapterUnavailable);
        }
        let mut slot = self
            .discovery
            .lock()
            .map_err(|_| BluetoothError::Platform("discovery state poisoned".to_string()))?;
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let adapter = self.adapter.clone();
        let found = self.found.clone();
        *slot = Some(self.runtime.spawn(async move {
            let events = match adapter.discover_devices().await {
                Ok(e) => e,
                Err(e) => {
                    log::error!("Unable to start discovery: {}", e);
                    return;
                }
            };
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(addr) = event {
                    if let Ok(device) = adapter.device(addr) {
                        let _ = found.send(describe(&device).await);
                    }
                }
            }
        }));
        Ok(())
    }

    fn cancel_discovery(&self) -> Result<()> {
        if let Some(t) = self.discovery.lock().ok().and_then(|mut d| d.take()) {
            t.abort();
        }
        Ok(())
    }

    fn show_device_picker(&self, _request_code: i32) -> Result<()> {
        Err(BluetoothError::Unsupported(
            "the device picker is only available on android",
        ))
    }

    fn set_discoverable(&self, duration: Duration) -> Result<()> {
        let secs = u32::try_from(duration.as_secs()).unwrap_or(u32::MAX);
        self.runtime.block_on(async {
            self.adapter.set_discoverable_timeout(secs).await?;
            self.adapter.set_discoverable(true).await
        })?;
        Ok(())
    }

    fn bonded_devices(&self) -> Result<Vec<BluetoothDevice>> {
        let devs = self.runtime.block_on(async {
            let mut devs = Vec::new();
            for addr in self.adapter.device_addresses().await? {
                let device = self.adapter.device(addr)?;
                if device.is_paired().await? {
                    devs.push(describe(&device).await);
                }
            }
            Ok::<_, bluer::Error>(devs)
        })?;
        Ok(devs)
    }

    fn connect_rfcomm(
        &self,
        address: BluetoothAddress,
        uuid: &BluetoothUuid,
        secure: bool,
    ) -> Result<Box<dyn RfcommSocket>> {
        let uuid = to_bluer_uuid(uuid)?;
        let addr: bluer::Address = address.into();
        let stream = self.runtime.block_on(async {
            let profile = Profile {
                uuid,
                role: Some(Role::Client),
                require_authentication: Some(secure),
                require_authorization: Some(false),
                auto_connect: Some(false),
                ..Default::default()
            };
            let mut handle: Pin<Box<ProfileHandle>> =
                Box::pin(self.session.register_profile(profile).await?);
            let device = self.adapter.device(addr)?;
            let accept = async {
                while let Some(req) = handle.next().await {
                    if req.device() == addr {
                        return req.accept().map_err(BluetoothError::from);
                    }
                    log::warn!("Ignoring rfcomm request from {}", req.device());
                }
                Err(BluetoothError::Platform(
                    "rfcomm profile was unregistered".to_string(),
                ))
            };
            let (connected, stream) = tokio::time::timeout(CONNECT_TIMEOUT, async {
                tokio::join!(device.connect_profile(&uuid), accept)
            })
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))?;
            connected?;
            let stream = stream?;
            Ok::<_, BluetoothError>((stream, describe(&device).await))
        })?;
        let (stream, remote) = stream;
        log::info!("Rfcomm connected to {}", remote.address);
        Ok(Box::new(BluezSocket::new(
            self.runtime.handle().clone(),
            stream,
            remote,
        )))
    }

    fn listen_rfcomm(
        &self,
        uuid: &BluetoothUuid,
        name: &str,
        secure: bool,
    ) -> Result<Box<dyn RfcommListener>> {
        let profile = Profile {
            uuid: to_bluer_uuid(uuid)?,
            name: Some(name.to_string()),
            role: Some(Role::Server),
            require_authentication: Some(secure),
            require_authorization: Some(false),
            ..Default::default()
        };
        let handle = self
            .runtime
            .block_on(self.session.register_profile(profile))?;
        Ok(Box::new(BluezListener {
            runtime: self.runtime.handle().clone(),
            adapter: self.adapter.clone(),
            profile: tokio::sync::Mutex::new(Some(Box::pin(handle))),
            closed: watch::channel(false).0,
        }))
    }

    fn connect_profile(&self, device: &BluetoothDevice, profile: &BluetoothUuid) -> Result<()> {
        let uuid = to_bluer_uuid(profile)?;
        self.runtime.block_on(async {
            let d = self.adapter.device(device.address.into())?;
            d.connect_profile(&uuid).await
        })?;
        Ok(())
    }
}

impl Drop for BluezBackend {
    fn drop(&mut self) {
        if let Ok(mut r) = self.receivers.lock() {
            for (_, t) in r.drain() {
                t.abort();
            }
        }
        if let Some(t) = self.discovery.lock().ok().and_then(|mut d| d.take()) {
            t.abort();
        }
    }
}

/// A connected rfcomm stream, split so reads and writes do not wait on each other
struct BluezSocket {
    runtime: tokio::runtime::Handle,
    remote: BluetoothDevice,
    reader: tokio::sync::Mutex<OwnedReadHalf>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
}

impl BluezSocket {
    fn new(runtime: tokio::runtime::Handle, stream: bluer::rfcomm::Stream, remote: BluetoothDevice) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            runtime,
            remote,
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            closed: watch::channel(false).0,
        }
    }
}

impl RfcommSocket for BluezSocket {
    fn remote(&self) -> BluetoothDevice {
        self.remote.clone()
    }

    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(std::io::Error::from(std::io::ErrorKind::NotConnected));
        }
        self.runtime.block_on(async {
            let mut reader = self.reader.lock().await;
            tokio::select! {
                r = reader.read(buf) => r,
                _ = closed.wait_for(|c| *c) => {
                    Err(std::io::Error::from(std::io::ErrorKind::NotConnected))
                }
            }
        })
    }

    fn write_all(&self, data: &[u8]) -> std::io::Result<()> {
        if *self.closed.borrow() {
            return Err(std::io::Error::from(std::io::ErrorKind::NotConnected));
        }
        self.runtime.block_on(async {
            let mut writer = self.writer.lock().await;
            writer.write_all(data).await?;
            writer.flush().await
        })
    }

    fn close(&self) -> std::io::Result<()> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        self.runtime.block_on(async {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                log::debug!("Rfcomm shutdown: {}", e);
            }
        });
        Ok(())
    }
}

/// A registered rfcomm server profile
struct BluezListener {
    runtime: tokio::runtime::Handle,
    adapter: bluer::Adapter,
    profile: tokio::sync::Mutex<Option<Pin<Box<ProfileHandle>>>>,
    closed: watch::Sender<bool>,
}

impl RfcommListener for BluezListener {
    fn accept(&self) -> Result<Box<dyn RfcommSocket>> {
        let mut closed = self.closed.subscribe();
        let (stream, remote) = self.runtime.block_on(async {
            let mut profile = self.profile.lock().await;
            let handle = profile.as_mut().ok_or(BluetoothError::NotConnected)?;
            let req = tokio::select! {
                r = handle.next() => r.ok_or_else(|| {
                    BluetoothError::Platform("rfcomm profile was unregistered".to_string())
                })?,
                _ = closed.wait_for(|c| *c) => return Err(BluetoothError::NotConnected),
            };
            let address = req.device();
            let stream = req.accept()?;
            let remote = match self.adapter.device(address) {
                Ok(d) => describe(&d).await,
                Err(_) => BluetoothDevice::new(address.into()),
            };
            Ok::<_, BluetoothError>((stream, remote))
        })?;
        log::info!("Accepted rfcomm connection from {}", remote.address);
        Ok(Box::new(BluezSocket::new(self.runtime.clone(), stream, remote)))
    }

    fn close(&self) -> Result<()> {
        self.closed.send_replace(true);
        let handle = self.runtime.block_on(async { self.profile.lock().await.take() });
        drop(handle);
        Ok(())
    }
}
