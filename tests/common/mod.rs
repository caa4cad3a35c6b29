//! An in-memory bluetooth stack for driving the facade in tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use simple_bluetooth::{
    BluetoothAddress, BluetoothBackend, BluetoothDevice, BluetoothError, BluetoothUuid,
    EventCallback, ReceiverId, ReceiverKind, Result, RfcommListener, RfcommSocket,
    SimpleBluetoothListener, SystemEvent,
};

const POLL: Duration = Duration::from_millis(10);

pub fn init_logging() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();
}

/// Poll until the condition holds, panicking after two seconds
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        std::thread::sleep(POLL);
    }
}

/// The far end of a mock rfcomm connection
pub struct MockPeer {
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    written: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn send(&self, data: &[u8]) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            tx.send(data.to_vec()).unwrap();
        }
    }

    /// Close the connection from the remote side
    pub fn hang_up(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// True once the local side closed the socket
    pub fn closed_locally(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockSocket {
    remote: BluetoothDevice,
    rx: Mutex<Receiver<Vec<u8>>>,
    pending: Mutex<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

pub fn socket_pair(remote: BluetoothDevice) -> (MockSocket, Arc<MockPeer>) {
    let (tx, rx) = channel();
    let written = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let peer = Arc::new(MockPeer {
        tx: Mutex::new(Some(tx)),
        written: written.clone(),
        closed: closed.clone(),
    });
    let socket = MockSocket {
        remote,
        rx: Mutex::new(rx),
        pending: Mutex::new(Vec::new()),
        written,
        closed,
    };
    (socket, peer)
}

impl RfcommSocket for MockSocket {
    fn remote(&self) -> BluetoothDevice {
        self.remote.clone()
    }

    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut pending = self.pending.lock().unwrap();
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(std::io::Error::from(std::io::ErrorKind::NotConnected));
            }
            if !pending.is_empty() {
                let n = buf.len().min(pending.len());
                buf[..n].copy_from_slice(&pending[..n]);
                pending.drain(..n);
                return Ok(n);
            }
            match self.rx.lock().unwrap().recv_timeout(POLL) {
                Ok(data) => pending.extend(data),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
    }

    fn write_all(&self, data: &[u8]) -> std::io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::NotConnected));
        }
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn close(&self) -> std::io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockListener {
    rx: Mutex<Receiver<MockSocket>>,
    closed: Arc<AtomicBool>,
}

impl RfcommListener for MockListener {
    fn accept(&self) -> Result<Box<dyn RfcommSocket>> {
        let rx = self.rx.lock().unwrap();
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(BluetoothError::NotConnected);
            }
            match rx.recv_timeout(POLL) {
                Ok(s) => return Ok(Box::new(s)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(BluetoothError::NotConnected),
            }
        }
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockBackend {
    pub enabled: AtomicBool,
    /// Receiver kinds whose registration fails
    pub failing_kinds: Mutex<Vec<ReceiverKind>>,
    pub fail_connects: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<ReceiverId, (ReceiverKind, EventCallback)>>,
    pub registered: Mutex<Vec<(ReceiverId, ReceiverKind)>>,
    pub unregistered: Mutex<Vec<ReceiverId>>,
    pub enable_requests: Mutex<Vec<bool>>,
    pub discovering: AtomicBool,
    pub pickers: Mutex<Vec<i32>>,
    pub discoverable: Mutex<Option<Duration>>,
    pub bonded: Mutex<Vec<BluetoothDevice>>,
    pub connects: Mutex<Vec<(BluetoothAddress, BluetoothUuid)>>,
    pub profiles: Mutex<Vec<(BluetoothDevice, BluetoothUuid)>>,
    pub servers: Mutex<Vec<(BluetoothUuid, String)>>,
    peers: Mutex<Vec<Arc<MockPeer>>>,
    clients: Mutex<Option<Sender<MockSocket>>>,
    listener_closed: Mutex<Option<Arc<AtomicBool>>>,
    /// When set, a found device registration waits for a message on it
    pub found_gate: Mutex<Option<Receiver<()>>>,
    pub found_entered: AtomicBool,
    /// Returned by the next rfcomm connect instead of a mock socket
    pub next_socket: Mutex<Option<Box<dyn RfcommSocket>>>,
}

impl MockBackend {
    pub fn new(enabled: bool) -> Arc<Self> {
        let b = Self::default();
        b.enabled.store(enabled, Ordering::SeqCst);
        Arc::new(b)
    }

    /// Deliver an event to every receiver of a kind that accepts it
    pub fn emit(&self, event: SystemEvent) {
        let callbacks: Vec<EventCallback> = self
            .callbacks
            .lock()
            .unwrap()
            .values()
            .filter(|(k, _)| k.accepts(&event))
            .map(|(_, c)| c.clone())
            .collect();
        for c in callbacks {
            c(event.clone());
        }
    }

    /// The callback of the first live receiver of a kind
    pub fn callback(&self, kind: ReceiverKind) -> Option<EventCallback> {
        self.callbacks
            .lock()
            .unwrap()
            .values()
            .find(|(k, _)| *k == kind)
            .map(|(_, c)| c.clone())
    }

    pub fn registered_kinds(&self) -> Vec<ReceiverKind> {
        self.registered.lock().unwrap().iter().map(|(_, k)| *k).collect()
    }

    pub fn unregistered_count(&self) -> usize {
        self.unregistered.lock().unwrap().len()
    }

    /// The peer of the most recent outgoing or accepted connection
    pub fn last_peer(&self) -> Arc<MockPeer> {
        self.peers.lock().unwrap().last().cloned().expect("no connection was made")
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Connect a client to the listening server socket
    pub fn incoming_client(&self, remote: BluetoothDevice) {
        let (socket, peer) = socket_pair(remote);
        self.peers.lock().unwrap().push(peer);
        self.clients
            .lock()
            .unwrap()
            .as_ref()
            .expect("no server socket")
            .send(socket)
            .unwrap();
    }

    pub fn listener_closed(&self) -> bool {
        self.listener_closed
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|c| c.load(Ordering::SeqCst))
    }
}

impl BluetoothBackend for MockBackend {
    fn is_enabled(&self) -> Result<bool> {
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    fn request_enable(&self, prompt_user: bool) -> Result<()> {
        self.enable_requests.lock().unwrap().push(prompt_user);
        Ok(())
    }

    fn register_receiver(&self, kind: ReceiverKind, callback: EventCallback) -> Result<ReceiverId> {
        if kind == ReceiverKind::FoundDevice {
            self.found_entered.store(true, Ordering::SeqCst);
            let gate = self.found_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
        }
        if self.failing_kinds.lock().unwrap().contains(&kind) {
            return Err(BluetoothError::Platform("registration refused".to_string()));
        }
        let id = ReceiverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.callbacks.lock().unwrap().insert(id, (kind, callback));
        self.registered.lock().unwrap().push((id, kind));
        Ok(id)
    }

    fn unregister_receiver(&self, id: ReceiverId) -> Result<()> {
        self.unregistered.lock().unwrap().push(id);
        match self.callbacks.lock().unwrap().remove(&id) {
            Some(_) => Ok(()),
            None => Err(BluetoothError::InvalidArgument(format!("{id:?}"))),
        }
    }

    fn start_discovery(&self) -> Result<()> {
        self.discovering.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_discovery(&self) -> Result<()> {
        self.discovering.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn show_device_picker(&self, request_code: i32) -> Result<()> {
        self.pickers.lock().unwrap().push(request_code);
        Ok(())
    }

    fn set_discoverable(&self, duration: Duration) -> Result<()> {
        *self.discoverable.lock().unwrap() = Some(duration);
        Ok(())
    }

    fn bonded_devices(&self) -> Result<Vec<BluetoothDevice>> {
        Ok(self.bonded.lock().unwrap().clone())
    }

    fn connect_rfcomm(
        &self,
        address: BluetoothAddress,
        uuid: &BluetoothUuid,
        _secure: bool,
    ) -> Result<Box<dyn RfcommSocket>> {
        self.connects.lock().unwrap().push((address, uuid.clone()));
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(BluetoothError::DeviceNotFound(address.to_string()));
        }
        if let Some(socket) = self.next_socket.lock().unwrap().take() {
            return Ok(socket);
        }
        let (socket, peer) = socket_pair(BluetoothDevice::new(address));
        self.peers.lock().unwrap().push(peer);
        Ok(Box::new(socket))
    }

    fn listen_rfcomm(
        &self,
        uuid: &BluetoothUuid,
        name: &str,
        _secure: bool,
    ) -> Result<Box<dyn RfcommListener>> {
        self.servers.lock().unwrap().push((uuid.clone(), name.to_string()));
        let (tx, rx) = channel();
        *self.clients.lock().unwrap() = Some(tx);
        let closed = Arc::new(AtomicBool::new(false));
        *self.listener_closed.lock().unwrap() = Some(closed.clone());
        Ok(Box::new(MockListener {
            rx: Mutex::new(rx),
            closed,
        }))
    }

    fn connect_profile(&self, device: &BluetoothDevice, profile: &BluetoothUuid) -> Result<()> {
        self.profiles
            .lock()
            .unwrap()
            .push((device.clone(), profile.clone()));
        Ok(())
    }
}

/// A listener writing every callback down as a line of text
#[derive(Default)]
pub struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, s: String) {
        self.0.lock().unwrap().push(s);
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn has(&self, line: &str) -> bool {
        self.0.lock().unwrap().iter().any(|l| l == line)
    }

    pub fn count_starting_with(&self, prefix: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|l| l.starts_with(prefix)).count()
    }

    pub fn wait_for(&self, line: &str) {
        wait_until(line, || self.has(line));
    }
}

impl SimpleBluetoothListener for Recorder {
    fn on_bluetooth_data_received(&self, _bytes: &[u8], text: &str) {
        self.push(format!("data {text}"));
    }
    fn on_device_connected(&self, device: &BluetoothDevice) {
        self.push(format!("link up {}", device.address));
    }
    fn on_device_disconnected(&self, device: &BluetoothDevice) {
        self.push(format!("link down {}", device.address));
    }
    fn on_discovery_started(&self) {
        self.push("discovery started".to_string());
    }
    fn on_discovery_finished(&self) {
        self.push("discovery finished".to_string());
    }
    fn on_device_paired(&self, device: &BluetoothDevice) {
        self.push(format!("paired {}", device.address));
    }
    fn on_device_unpaired(&self, device: &BluetoothDevice) {
        self.push(format!("unpaired {}", device.address));
    }
    fn on_device_found(&self, device: &BluetoothDevice) {
        self.push(format!("found {}", device.display_name()));
    }
    fn on_adapter_state_changed(&self, enabled: bool) {
        self.push(format!("adapter {enabled}"));
    }
    fn on_connection_established(&self, device: &BluetoothDevice) {
        self.push(format!("connected {}", device.address));
    }
    fn on_connection_failed(&self, _device: Option<&BluetoothDevice>, _reason: &str) {
        self.push("failed".to_string());
    }
    fn on_connection_lost(&self, device: &BluetoothDevice) {
        self.push(format!("lost {}", device.address));
    }
    fn on_notification(&self, message: &str) {
        self.push(format!("note {message}"));
    }
}
