use commkit::prelude::*;

use std::thread;
use std::time::{Duration, Instant};

const ENDPOINT_PORT: u16 = 44610;
const ROUTING_PORT: u16 = 44620;

#[test]
fn minimalist_engine_creates_unique_endpoints() {
    let engine = EngineCfg::default().init().unwrap();
    assert_eq!(engine.mode(), EngineMode::Minimalist);

    let ep1 = engine.create_endpoint().unwrap();
    let ep2 = engine.create_endpoint().unwrap();

    for ep in [&ep1, &ep2] {
        let id = ep.id();
        assert_eq!(id.len(), commkit::ENDPOINT_ID_LEN);
        assert!(id.as_bytes()[0].is_ascii_digit());
        assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
    }
    assert_ne!(ep1.id(), ep2.id());

    assert!(engine.lookup_ep(ep1.id()).is_some());
    assert!(engine.lookup_ep("no-such-endpoint").is_none());
}

#[test]
fn facade_rejects_a_second_concrete_transport() {
    let engine = EngineCfg::default().init().unwrap();

    let first = TcpTransportCfg {
        num_rx: 4,
        num_tx: 4,
        ..Default::default()
    }
    .init()
    .unwrap();
    let facade = engine
        .add_transport(ConcreteTransport::Tcp(first))
        .unwrap();
    assert_eq!(facade.kind(), Some(TransportKind::Tcp));

    let second = TcpTransportCfg {
        num_rx: 4,
        num_tx: 4,
        ..Default::default()
    }
    .init()
    .unwrap();
    assert!(matches!(
        facade.add(ConcreteTransport::Tcp(second)),
        Err(Error::AlreadySet)
    ));
}

#[test]
fn endpoint_without_a_transport_cannot_send() {
    let engine = EngineCfg::default().init().unwrap();
    let ep = engine.create_endpoint().unwrap();
    assert!(matches!(ep.send(b"nope"), Err(Error::InvalidState)));
}

#[test]
fn connect_requires_auto_mode() {
    let engine = EngineCfg::default().init().unwrap();
    assert!(matches!(
        engine.connect("127.0.0.1"),
        Err(Error::InvalidState)
    ));
}

#[test]
fn engine_mode_parses_from_config() {
    let config = config::Config::builder()
        .set_default("engine_mode", "auto")
        .unwrap()
        .build()
        .unwrap();
    let cfg = EngineCfg::from_config(&config, "").unwrap();
    assert_eq!(cfg.mode, EngineMode::Auto);

    let config = config::Config::builder()
        .set_default("engine_mode", "turbo")
        .unwrap()
        .build()
        .unwrap();
    assert!(matches!(
        EngineCfg::from_config(&config, ""),
        Err(Error::InvalidEngineMode { .. })
    ));
}

// Two minimalist engines wired back to back: one hosts an accepting
// transport, the other dials it; payloads flow endpoint to endpoint through
// the event threads.
#[test]
fn endpoints_exchange_messages_across_engines() {
    let server_engine = EngineCfg::default().init().unwrap();
    let server_tcp = TcpTransportCfg {
        interface: "127.0.0.1".to_string(),
        port_low: ENDPOINT_PORT,
        port_high: ENDPOINT_PORT,
        accept: true,
        do_not_block_on_accept: true,
        ..Default::default()
    }
    .init()
    .unwrap();
    server_engine
        .add_transport(ConcreteTransport::Tcp(server_tcp.clone()))
        .unwrap();
    let server_ep = server_engine.create_endpoint().unwrap();

    let client_engine = EngineCfg::default().init().unwrap();
    let client_tcp = TcpTransportCfg {
        interface: "127.0.0.1".to_string(),
        port_low: ENDPOINT_PORT,
        port_high: ENDPOINT_PORT,
        ..Default::default()
    }
    .init()
    .unwrap();
    let client_facade = client_engine
        .add_transport(ConcreteTransport::Tcp(client_tcp.clone()))
        .unwrap();

    let client_ep = client_facade.connect("127.0.0.1").unwrap();
    assert_eq!(client_tcp.status(), TcpStatus::Connected);

    client_ep.send(b"ping").unwrap();
    let got = server_ep.recv().unwrap();
    assert_eq!(got, b"ping");

    server_ep.send(b"pong").unwrap();
    let got = client_ep.recv().unwrap();
    assert_eq!(got, b"pong");

    client_ep.disconnect().unwrap();
    server_ep.disconnect().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while server_tcp.status() != TcpStatus::Closed {
        assert!(Instant::now() < deadline, "server transport never closed");
        thread::sleep(Duration::from_millis(10));
    }

    client_facade.fini().unwrap();
}

// Two endpoints cannot share frames addressed to one of them: dispatch
// resolves the destination id, so the message lands on the endpoint bound
// to it and nowhere else.
#[test]
fn accepting_facade_routes_by_destination() {
    let server_engine = EngineCfg::default().init().unwrap();
    let server_tcp = TcpTransportCfg {
        interface: "127.0.0.1".to_string(),
        port_low: ROUTING_PORT,
        port_high: ROUTING_PORT,
        accept: true,
        do_not_block_on_accept: true,
        ..Default::default()
    }
    .init()
    .unwrap();
    server_engine
        .add_transport(ConcreteTransport::Tcp(server_tcp))
        .unwrap();

    // Both endpoints serve the accepting transport; its advertised wire id
    // belongs to the first.
    let ep1 = server_engine.create_endpoint().unwrap();
    let ep2 = server_engine.create_endpoint().unwrap();

    let client_engine = EngineCfg::default().init().unwrap();
    let client_tcp = TcpTransportCfg {
        interface: "127.0.0.1".to_string(),
        port_low: ROUTING_PORT,
        port_high: ROUTING_PORT,
        ..Default::default()
    }
    .init()
    .unwrap();
    let client_facade = client_engine
        .add_transport(ConcreteTransport::Tcp(client_tcp))
        .unwrap();
    let client_ep = client_facade.connect("127.0.0.1").unwrap();

    client_ep.send(b"addressed message").unwrap();

    let got = ep1.recv().unwrap();
    assert_eq!(got, b"addressed message");
    // The frame was dispatched exactly once, and not to ep2.
    assert!(ep2.try_recv().is_none());

    client_ep.disconnect().unwrap();
}

#[test]
fn fini_releases_the_transport_and_emits_a_termination_event() {
    let engine = EngineCfg::default().init().unwrap();
    let tcp = TcpTransportCfg {
        num_rx: 4,
        num_tx: 4,
        ..Default::default()
    }
    .init()
    .unwrap();
    let facade = engine.add_transport(ConcreteTransport::Tcp(tcp)).unwrap();

    facade.fini().unwrap();

    // No endpoint is attached, so the event is still queued for us.
    let evt = facade.try_next_event().expect("termination event queued");
    assert_eq!(evt.kind, commkit::EventKind::Term);
    facade.ret_event(evt);
    assert!(facade.try_next_event().is_none());
}
