//! Integration tests for sessions and the registry working together.
//!
//! # Purpose
//!
//! These tests drive [`PortRegistry`] and the sessions it hands out through
//! the public API, with the scripted transport standing in for hardware and
//! the mock enumerator standing in for the OS port list.  They verify:
//!
//! - Framed packets arrive at subscribers for each framing mode.
//! - A port disappearing from a scan closes its session without an explicit
//!   `close`.
//! - A transport fault closes the session, reports the error and removes
//!   the registry entry.
//! - Sessions for different ports do not affect each other.

use std::time::Duration;

use serial_core::FrameDelimiters;
use serial_monitor::application::port_session::lock_session;
use serial_monitor::infrastructure::enumeration::mock::MockPortEnumerator;
use serial_monitor::infrastructure::enumeration::PortInfo;
use serial_monitor::infrastructure::transport::mock::ScriptedTransportFactory;
use serial_monitor::infrastructure::transport::TransportError;
use serial_monitor::{ErrorKind, PortRegistry, PortSettings, SessionEvent, SessionState};
use tokio::sync::mpsc::UnboundedReceiver;

fn make_registry(ports: &[&str]) -> (PortRegistry, MockPortEnumerator, ScriptedTransportFactory) {
    let enumerator = MockPortEnumerator::with_ports(ports);
    let factory = ScriptedTransportFactory::new();
    let registry = PortRegistry::new(Box::new(enumerator.clone()), Box::new(factory.clone()));
    (registry, enumerator, factory)
}

fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn packets(events: &[SessionEvent]) -> Vec<Vec<u8>> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Packet(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

// ── Framing through the read path ─────────────────────────────────────────────

/// Bytes fed to the transport come out as framed packets once polled.
#[test]
fn test_header_only_packets_flow_from_transport_to_subscriber() {
    // Arrange
    let (mut registry, _, factory) = make_registry(&["COM1"]);
    registry.scan().unwrap();
    let settings =
        PortSettings::default().with_delimiters(FrameDelimiters::header_only([0xFF, 0x00], 0));
    let session = registry.open("COM1", settings).expect("open should succeed");
    let mut rx = lock_session(&session).subscribe();
    let handle = factory.handle("COM1");

    // Act: a frame split across three reads.
    handle.feed(vec![0x01, 0x02]);
    handle.feed(vec![0xFF]);
    handle.feed(vec![0x00, 0x03, 0xFF, 0x00]);
    let mut scratch = [0u8; 64];
    for _ in 0..3 {
        lock_session(&session).poll(&mut scratch).unwrap();
    }

    // Assert
    assert_eq!(packets(&drain(&mut rx)), vec![vec![0x01, 0x02], vec![0x03]]);
}

#[test]
fn test_header_footer_packets_include_header() {
    let (mut registry, _, factory) = make_registry(&["COM1"]);
    let settings =
        PortSettings::default().with_delimiters(FrameDelimiters::header_footer(*b"$", *b"\r\n"));
    let session = registry.open("COM1", settings).unwrap();
    let mut rx = lock_session(&session).subscribe();

    factory.handle("COM1").feed(b"noise$GPGGA,1\r\n$GPRMC,2\r\n$GP".to_vec());
    lock_session(&session).poll(&mut [0u8; 256]).unwrap();

    assert_eq!(
        packets(&drain(&mut rx)),
        vec![b"$GPGGA,1".to_vec(), b"$GPRMC,2".to_vec()]
    );
    assert_eq!(lock_session(&session).buffered(), b"$GP");
}

#[test]
fn test_transmit_reaches_transport() {
    let (mut registry, _, factory) = make_registry(&["COM1"]);
    let session = registry.open("COM1", PortSettings::default()).unwrap();

    lock_session(&session).send(b"AT\r\n").unwrap();

    assert_eq!(factory.handle("COM1").written(), vec![b"AT\r\n".to_vec()]);
}

#[test]
fn test_transmit_failure_emits_error_event_only() {
    let (mut registry, _, factory) = make_registry(&["COM1"]);
    let session = registry.open("COM1", PortSettings::default()).unwrap();
    let mut rx = lock_session(&session).subscribe();
    factory.handle("COM1").fail_next_write(TransportError::Timeout {
        port: "COM1".to_string(),
    });

    let result = lock_session(&session).send(b"x");

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Transmit);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        SessionEvent::Error { kind: ErrorKind::Transmit, .. }
    ));
    assert_eq!(registry.active_ports(), vec!["COM1".to_string()]);
}

// ── Enumeration diff ──────────────────────────────────────────────────────────

/// A session whose port vanishes from a scan is closed and no longer found,
/// without anyone calling `close`.
#[test]
fn test_vanished_port_session_is_closed_by_scan() {
    // Arrange
    let (mut registry, enumerator, factory) = make_registry(&["COM1", "COM2"]);
    registry.scan().unwrap();
    let com1 = registry.open("COM1", PortSettings::default()).unwrap();
    let com2 = registry.open("COM2", PortSettings::default()).unwrap();
    let mut rx = lock_session(&com1).subscribe();

    // Act
    enumerator.remove_port("COM1");
    let snapshot = registry.scan().unwrap();

    // Assert
    assert!(!snapshot.contains_key("COM1"));
    assert!(registry.session("COM1").is_none());
    assert_eq!(registry.active_ports(), vec!["COM2".to_string()]);
    assert_eq!(drain(&mut rx), vec![SessionEvent::Closed]);
    assert!(!factory.handle("COM1").is_connected());
    assert!(lock_session(&com2).is_open());
}

/// A port that comes back after vanishing gets a fresh session on open.
#[test]
fn test_reappearing_port_can_be_reopened() {
    let (mut registry, enumerator, _) = make_registry(&["COM1"]);
    registry.scan().unwrap();
    let first = registry.open("COM1", PortSettings::default()).unwrap();

    enumerator.remove_port("COM1");
    registry.scan().unwrap();
    enumerator.set_ports(vec![PortInfo::named("COM1")]);
    registry.scan().unwrap();
    let second = registry.open("COM1", PortSettings::default()).unwrap();

    assert!(!std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(lock_session(&first).state(), SessionState::Closed);
    assert!(lock_session(&second).is_open());
}

// ── Faults ────────────────────────────────────────────────────────────────────

#[test]
fn test_read_fault_closes_session_and_drops_registry_entry() {
    // Arrange
    let (mut registry, _, factory) = make_registry(&["COM1"]);
    registry.scan().unwrap();
    let session = registry.open("COM1", PortSettings::default()).unwrap();
    let mut rx = lock_session(&session).subscribe();
    lock_session(&session).on_bytes_received(b"partial");
    factory.handle("COM1").fail_read(TransportError::PermissionDenied {
        port: "COM1".to_string(),
    });

    // Act
    let result = lock_session(&session).poll(&mut [0u8; 16]);

    // Assert
    assert_eq!(result.unwrap_err().kind(), ErrorKind::TransportFault);
    let events = drain(&mut rx);
    assert!(matches!(
        &events[..],
        [SessionEvent::Packet(_), SessionEvent::Error { kind: ErrorKind::TransportFault, .. }, SessionEvent::Closed]
    ));
    assert_eq!(lock_session(&session).buffered_len(), 0);
    assert!(registry.session("COM1").is_none());
    assert!(!registry.close("COM1"));
    assert_eq!(
        registry.last_error("COM1").as_deref(),
        Some("permission error on COM1")
    );
}

// ── Independence and throughput ───────────────────────────────────────────────

#[test]
fn test_sessions_for_different_ports_are_independent() {
    let (mut registry, _, _) = make_registry(&["COM1", "COM2"]);
    let a = registry
        .open(
            "COM1",
            PortSettings::default().with_delimiters(FrameDelimiters::header_only(*b"|", 0)),
        )
        .unwrap();
    let b = registry.open("COM2", PortSettings::default()).unwrap();
    let mut rx_b = lock_session(&b).subscribe();

    lock_session(&a).pause();
    lock_session(&a).on_bytes_received(b"x|y|");
    lock_session(&b).on_bytes_received(b"raw");

    assert!(lock_session(&b).is_emitting());
    assert_eq!(packets(&drain(&mut rx_b)), vec![b"raw".to_vec()]);
    assert_eq!(lock_session(&a).buffered(), b"y|");
}

#[test]
fn test_throughput_is_reported_per_port_in_port_list() {
    let (mut registry, _, _) = make_registry(&["COM1", "COM2"]);
    registry.scan().unwrap();
    let a = registry.open("COM1", PortSettings::default()).unwrap();
    registry.open("COM2", PortSettings::default()).unwrap();
    lock_session(&a).on_bytes_received(&[0u8; 250]);

    registry.account_throughput(Duration::from_millis(250));

    let list = registry.port_list();
    assert_eq!(list[0].name, "COM1");
    assert_eq!(list[0].bytes_per_second, 1000.0);
    assert_eq!(list[1].bytes_per_second, 0.0);
}

/// The port list is what a UI renders, so it must serialise cleanly.
#[test]
fn test_port_list_serialises_to_json() {
    let (mut registry, _, _) = make_registry(&["/dev/ttyUSB0"]);
    registry.scan().unwrap();

    let json = serde_json::to_value(registry.port_list()).expect("serialize");

    assert_eq!(json[0]["name"], "/dev/ttyUSB0");
    assert_eq!(json[0]["busy"], false);
    assert!(json[0]["baud_rates"].as_array().unwrap().contains(&250_000.into()));
}
