mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockBackend, Recorder, init_logging, wait_until};
use simple_bluetooth::{
    BluetoothAddress, BluetoothDevice, BluetoothError, BluetoothHandler, BluetoothUuid,
    DefaultBluetoothHandler, ReceiverKind, SimpleBluetooth, SystemEvent,
};

fn dev(last: u8) -> BluetoothDevice {
    BluetoothDevice::new(BluetoothAddress([0, 0x11, 0x22, 0x33, 0x44, last]))
}

#[test]
fn operations_require_initialization() {
    init_logging();
    let backend = MockBackend::new(false);
    let bt = SimpleBluetooth::new(backend.clone(), Recorder::new());
    assert!(!bt.is_initialized());
    assert!(matches!(bt.send_data("hi"), Err(BluetoothError::NotInitialized)));
    assert!(matches!(bt.scan(), Err(BluetoothError::NotInitialized)));
    assert!(matches!(bt.scan_with_picker(3), Err(BluetoothError::NotInitialized)));
    assert!(matches!(
        bt.connect_to_bluetooth_device("00:11:22:33:44:55"),
        Err(BluetoothError::NotInitialized)
    ));
    assert!(matches!(bt.connect_to_device(&dev(1)), Err(BluetoothError::NotInitialized)));
    assert!(matches!(
        bt.connect_to_bluetooth_server("00:11:22:33:44:55"),
        Err(BluetoothError::NotInitialized)
    ));
    assert!(matches!(
        bt.create_bluetooth_server_connection(),
        Err(BluetoothError::NotInitialized)
    ));
    assert!(matches!(bt.connect_to_a2dp_device("Speaker"), Err(BluetoothError::NotInitialized)));
    assert!(backend.connects.lock().unwrap().is_empty());
    assert!(!backend.discovering.load(std::sync::atomic::Ordering::SeqCst));

    bt.cancel_scan().unwrap();
    bt.make_discoverable(60).unwrap();
}

#[test]
fn initialize_with_the_adapter_on() {
    let backend = MockBackend::new(true);
    let bt = SimpleBluetooth::new(backend.clone(), Recorder::new());
    assert!(bt.initialize().unwrap());
    assert!(bt.is_initialized());
    assert!(backend.enable_requests.lock().unwrap().is_empty());
    bt.scan().unwrap();
    assert!(backend.discovering.load(std::sync::atomic::Ordering::SeqCst));
    bt.cancel_scan().unwrap();
    assert!(!backend.discovering.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn adapter_events_complete_and_clear_initialization() {
    let backend = MockBackend::new(false);
    let rec = Recorder::new();
    let bt = SimpleBluetooth::new(backend.clone(), rec.clone());
    assert!(!bt.initialize().unwrap());
    assert!(!bt.initialize_silent().unwrap());
    assert_eq!(*backend.enable_requests.lock().unwrap(), vec![true, false]);
    assert!(!bt.is_initialized());

    backend.emit(SystemEvent::AdapterEnabled);
    assert!(bt.is_initialized());
    assert!(rec.has("adapter true"));

    backend.emit(SystemEvent::AdapterDisabled);
    assert!(!bt.is_initialized());
    assert!(rec.has("adapter false"));
}

#[test]
fn missing_custom_handler_is_rejected() {
    let backend = MockBackend::new(true);
    let r = SimpleBluetooth::with_handler(backend.clone(), None);
    match r {
        Err(BluetoothError::InvalidArgument(msg)) => {
            assert_eq!(msg, "Custom BluetoothHandler cannot be null!")
        }
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("a facade was built without a handler"),
    }
    assert!(backend.registered.lock().unwrap().is_empty());
}

#[test]
fn construction_registers_the_default_receivers() {
    let backend = MockBackend::new(true);
    let _bt = SimpleBluetooth::new(backend.clone(), Recorder::new());
    assert_eq!(backend.registered_kinds(), ReceiverKind::DEFAULT_SET.to_vec());
}

#[test]
fn end_unregisters_each_receiver_once() {
    let backend = MockBackend::new(true);
    let bt = SimpleBluetooth::new(backend.clone(), Recorder::new());
    bt.enable_found_device_events().unwrap();
    bt.end();
    bt.end();
    drop(bt);

    let mut registered: Vec<_> = backend
        .registered
        .lock()
        .unwrap()
        .iter()
        .map(|(id, _)| *id)
        .collect();
    let mut unregistered = backend.unregistered.lock().unwrap().clone();
    registered.sort();
    unregistered.sort();
    assert_eq!(registered.len(), 4);
    assert_eq!(registered, unregistered);
}

#[test]
fn dropping_ends_the_facade() {
    let backend = MockBackend::new(true);
    let bt = SimpleBluetooth::new(backend.clone(), Recorder::new());
    drop(bt);
    assert_eq!(backend.unregistered_count(), 3);
}

#[test]
fn end_tolerates_failed_registrations() {
    let backend = MockBackend::new(true);
    backend
        .failing_kinds
        .lock()
        .unwrap()
        .push(ReceiverKind::Pairing);
    let rec = Recorder::new();
    let bt = SimpleBluetooth::new(backend.clone(), rec.clone());
    assert_eq!(
        backend.registered_kinds(),
        vec![ReceiverKind::AdapterState, ReceiverKind::Connection]
    );

    // the facade stays usable
    assert!(bt.initialize().unwrap());
    backend.emit(SystemEvent::DevicePaired(dev(1)));
    assert!(!rec.has("paired 00:11:22:33:44:01"));

    bt.end();
    assert_eq!(backend.unregistered_count(), 2);
}

#[test]
fn receiver_events_reach_the_listener() {
    let backend = MockBackend::new(true);
    let rec = Recorder::new();
    let bt = SimpleBluetooth::new(backend.clone(), rec.clone());

    backend.emit(SystemEvent::DevicePaired(dev(1)));
    backend.emit(SystemEvent::DeviceUnpaired(dev(1)));
    backend.emit(SystemEvent::DeviceConnected(dev(2)));
    backend.emit(SystemEvent::DeviceDisconnected(dev(2)));
    backend.emit(SystemEvent::DiscoveryStarted);
    backend.emit(SystemEvent::DiscoveryFinished);
    assert_eq!(
        rec.lines(),
        vec![
            "paired 00:11:22:33:44:01",
            "unpaired 00:11:22:33:44:01",
            "link up 00:11:22:33:44:02",
            "link down 00:11:22:33:44:02",
            "discovery started",
            "discovery finished",
        ]
    );

    // found devices are only reported once asked for
    let found = BluetoothDevice::named(dev(3).address, "Radio");
    backend.emit(SystemEvent::DeviceFound(found.clone()));
    assert!(!rec.has("found Radio"));
    bt.enable_found_device_events().unwrap();
    backend.emit(SystemEvent::DeviceFound(found));
    assert!(rec.has("found Radio"));
}

#[test]
fn replacing_the_listener() {
    let backend = MockBackend::new(true);
    let first = Recorder::new();
    let second = Recorder::new();
    let bt = SimpleBluetooth::new(backend.clone(), first.clone());
    bt.set_listener(Some(second.clone()));
    backend.emit(SystemEvent::DiscoveryStarted);
    assert!(first.lines().is_empty());
    assert!(second.has("discovery started"));

    bt.set_listener(None);
    backend.emit(SystemEvent::DiscoveryFinished);
    assert!(!second.has("discovery finished"));
}

#[test]
fn custom_handler_listener_receives_events() {
    let backend = MockBackend::new(true);
    let rec = Recorder::new();
    let handler: Arc<dyn BluetoothHandler> = Arc::new(DefaultBluetoothHandler::new(Some(rec.clone())));
    let bt = SimpleBluetooth::with_handler(backend.clone(), Some(handler)).unwrap();
    backend.emit(SystemEvent::AdapterEnabled);
    assert!(bt.is_initialized());
    assert!(rec.has("adapter true"));
}

#[test]
fn picker_and_discoverability() {
    let backend = MockBackend::new(true);
    let bt = SimpleBluetooth::new(backend.clone(), Recorder::new());
    bt.initialize().unwrap();
    bt.scan_with_picker(7).unwrap();
    assert_eq!(*backend.pickers.lock().unwrap(), vec![7]);

    bt.make_discoverable(120).unwrap();
    assert_eq!(*backend.discoverable.lock().unwrap(), Some(Duration::from_secs(120)));
    bt.make_discoverable(10_000).unwrap();
    assert_eq!(*backend.discoverable.lock().unwrap(), Some(Duration::from_secs(3600)));
    bt.make_discoverable(0).unwrap();
    assert_eq!(*backend.discoverable.lock().unwrap(), Some(Duration::ZERO));
}

#[test]
fn a2dp_connects_by_bonded_name() {
    let backend = MockBackend::new(true);
    let speaker = BluetoothDevice::named(dev(9).address, "Speaker");
    backend.bonded.lock().unwrap().push(dev(8));
    backend.bonded.lock().unwrap().push(speaker.clone());
    let bt = SimpleBluetooth::new(backend.clone(), Recorder::new());
    bt.initialize().unwrap();

    assert!(bt.a2dp_device().is_none());
    bt.connect_to_a2dp_device("Speaker").unwrap();
    assert_eq!(bt.a2dp_device(), Some(speaker.clone()));
    assert_eq!(
        *backend.profiles.lock().unwrap(),
        vec![(speaker, BluetoothUuid::A2dpSink)]
    );

    assert!(matches!(
        bt.connect_to_a2dp_device("Headset"),
        Err(BluetoothError::DeviceNotFound(_))
    ));
}

#[test]
fn end_waits_for_a_found_device_registration_in_flight() {
    let backend = MockBackend::new(true);
    let (release, gate) = std::sync::mpsc::channel();
    *backend.found_gate.lock().unwrap() = Some(gate);
    let bt = Arc::new(SimpleBluetooth::new(backend.clone(), Recorder::new()));

    let b2 = bt.clone();
    let enabling = std::thread::spawn(move || b2.enable_found_device_events());
    wait_until("registration started", || {
        backend.found_entered.load(std::sync::atomic::Ordering::SeqCst)
    });
    let b3 = bt.clone();
    let ending = std::thread::spawn(move || b3.end());
    std::thread::sleep(Duration::from_millis(50));
    release.send(()).unwrap();
    let enabled = enabling.join().unwrap();
    ending.join().unwrap();

    assert!(enabled.is_ok());
    let mut registered: Vec<_> = backend
        .registered
        .lock()
        .unwrap()
        .iter()
        .map(|(id, _)| *id)
        .collect();
    let mut unregistered = backend.unregistered.lock().unwrap().clone();
    registered.sort();
    unregistered.sort();
    assert_eq!(registered.len(), 4);
    assert_eq!(registered, unregistered);

    assert!(matches!(
        bt.enable_found_device_events(),
        Err(BluetoothError::NotInitialized)
    ));
}

#[test]
fn events_after_end_are_dropped() {
    let backend = MockBackend::new(false);
    let rec = Recorder::new();
    let bt = SimpleBluetooth::new(backend.clone(), rec.clone());
    let adapter = backend.callback(ReceiverKind::AdapterState).unwrap();
    let pairing = backend.callback(ReceiverKind::Pairing).unwrap();

    bt.end();
    adapter(SystemEvent::AdapterEnabled);
    pairing(SystemEvent::DevicePaired(dev(1)));

    assert!(!bt.is_initialized());
    assert!(rec.lines().is_empty());
}
