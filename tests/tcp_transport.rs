use commkit::prelude::*;

use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

const CLIENT_ID: &str = "1-i-am-the-client";
const MSG1: &[u8] = b"message 1";
const MSG2: &[u8] = b"message 2";
const ALL_DONE: &[u8] = b"All done.";

const ECHO_PORT: u16 = 44444;

fn wait_for_status(transport: &TcpTransport, want: TcpStatus) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while transport.status() != want {
        assert!(
            Instant::now() < deadline,
            "transport never reached {want:?}, still {:?}",
            transport.status()
        );
        thread::sleep(Duration::from_millis(10));
    }
}

fn run_echo_server() {
    let server = TcpTransportCfg {
        interface: "127.0.0.1".to_string(),
        port_low: ECHO_PORT,
        port_high: ECHO_PORT,
        accept: true,
        ..Default::default()
    }
    .init()
    .expect("unable to instantiate the server transport");
    assert_eq!(server.status(), TcpStatus::Connected);

    // Both messages arrive in send order.
    for expected in [MSG1, MSG2] {
        let rx = server.recv_rx().expect("receive queue closed early");
        assert_eq!(frame::payload(&rx).unwrap(), expected);
        server.return_rx(rx).unwrap();
    }

    let hdr = frame::TcpHeader {
        msg_type: frame::DATAMSG.to_string(),
        src: server.first_receiver_ep().expect("server has a local id"),
        dst: server.first_remote_ep().expect("handshake recorded the client"),
    };
    server
        .send_msg(&hdr, ALL_DONE)
        .expect("unable to send the final message");

    // The client answers with a termination message, which stops the
    // receive worker.
    wait_for_status(&server, TcpStatus::Closed);
}

#[test]
fn tcp_echo_round_trip() {
    let server = thread::spawn(run_echo_server);

    let client = TcpTransportCfg {
        interface: "127.0.0.1".to_string(),
        port_low: ECHO_PORT,
        port_high: ECHO_PORT,
        ..Default::default()
    }
    .init()
    .expect("unable to instantiate the client transport");

    let server_id = client
        .connect(CLIENT_ID, "127.0.0.1")
        .expect("connect failed");
    assert_eq!(server_id.len(), commkit::ENDPOINT_ID_LEN);
    assert_eq!(client.status(), TcpStatus::Connected);

    let hdr = frame::TcpHeader {
        msg_type: frame::DATAMSG.to_string(),
        src: CLIENT_ID.to_string(),
        dst: server_id.clone(),
    };
    client.send_msg(&hdr, MSG1).expect("unable to send");
    client.send_msg(&hdr, MSG2).expect("unable to send");

    let rx = client.recv_rx().expect("receive queue closed early");
    assert_eq!(frame::payload(&rx).unwrap(), ALL_DONE);
    client.return_rx(rx).unwrap();

    client
        .send_term_msg(CLIENT_ID, &server_id)
        .expect("unable to send the termination message");

    server.join().expect("server thread failed");
    client.close().expect("close failed");
}

#[test]
fn send_msg_fails_when_the_tx_pool_is_exhausted() {
    // Two TX buffers and no send worker draining them: the third send has
    // nothing left to frame into.
    let transport = TcpTransportCfg {
        num_tx: 2,
        ..Default::default()
    }
    .init()
    .unwrap();

    let hdr = frame::TcpHeader {
        msg_type: frame::DATAMSG.to_string(),
        src: CLIENT_ID.to_string(),
        dst: String::new(),
    };
    transport.send_msg(&hdr, b"one").unwrap();
    transport.send_msg(&hdr, b"two").unwrap();
    assert!(matches!(
        transport.send_msg(&hdr, b"three"),
        Err(Error::PoolExhausted)
    ));
}

#[test]
fn handshake_mismatch_when_the_server_answers_with_data() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        // Consume the connection request.
        let mut buf = vec![0u8; 4096];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(frame::tag(&buf), frame::CONNREQ);

        // Answer with a data message instead of the acknowledgement.
        let mut reply = vec![0u8; 4096];
        frame::set_header(
            &mut reply,
            &frame::TcpHeader {
                msg_type: frame::DATAMSG.to_string(),
                src: "9-rogue-server".to_string(),
                dst: String::new(),
            },
        )
        .unwrap();
        frame::set_payload(&mut reply, b"not an ack");
        stream.write_all(&reply).unwrap();
    });

    let client = TcpTransportCfg {
        interface: "127.0.0.1".to_string(),
        port_low: port,
        port_high: port,
        ..Default::default()
    }
    .init()
    .unwrap();

    let err = client.connect(CLIENT_ID, "127.0.0.1").unwrap_err();
    assert!(
        matches!(err, Error::HandshakeMismatch { .. }),
        "expected a handshake mismatch, got {err:?}"
    );

    server.join().unwrap();
}
