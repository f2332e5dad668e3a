use commkit::prelude::*;

use std::sync::Arc;
use std::thread;

const PEER_A: &str = "peer-a";
const PEER_B: &str = "peer-b";

fn two_peer_cfg() -> SmTransportCfg {
    SmTransportCfg {
        peer1: PEER_A.to_string(),
        peer2: PEER_B.to_string(),
        block_size: 4096,
        num_blocks: 512,
    }
}

#[test]
fn sm_ping_pong() {
    let transport = two_peer_cfg().init().expect("unable to map the segment");
    let num_blocks = 512;

    let peer_a = {
        let transport = Arc::clone(&transport);
        thread::spawn(move || {
            transport.send(PEER_B, b"message 1").unwrap();
            transport.send(PEER_B, b"message 2").unwrap();

            let reply = transport.recv(PEER_A).unwrap();
            assert_eq!(&reply[..8], b"all done");
        })
    };

    // Peer B sees both messages in send order.
    let m1 = transport.recv(PEER_B).unwrap();
    assert_eq!(&m1[..9], b"message 1");
    let m2 = transport.recv(PEER_B).unwrap();
    assert_eq!(&m2[..9], b"message 2");

    transport.send(PEER_A, b"all done").unwrap();
    peer_a.join().expect("peer A failed");

    // Every block is back on the free list.
    assert_eq!(transport.available_blocks(), num_blocks);

    let path = transport.region_path().expect("mapping is alive");
    assert!(path.exists());
    transport.fini().expect("fini failed");
    assert!(!path.exists(), "backing file survived fini");
}

#[test]
fn sm_blocks_cycle_through_heavy_traffic() {
    let transport = SmTransportCfg {
        peer1: PEER_A.to_string(),
        peer2: PEER_B.to_string(),
        block_size: 64,
        num_blocks: 8,
    }
    .init()
    .unwrap();

    // Far more messages than blocks: reuse must recycle the free list.
    for round in 0..100u32 {
        let msg = round.to_le_bytes();
        transport.send(PEER_B, &msg).unwrap();
        let got = transport.recv(PEER_B).unwrap();
        assert_eq!(&got[..4], &msg[..]);
    }

    assert_eq!(transport.available_blocks(), 8);
    transport.fini().unwrap();
}

#[test]
fn sm_rejects_unknown_ids() {
    let transport = two_peer_cfg().init().unwrap();

    assert!(matches!(
        transport.send("stranger", b"hi"),
        Err(Error::UnknownPeer(_))
    ));
    assert!(matches!(
        transport.recv("stranger"),
        Err(Error::UnknownPeer(_))
    ));
    assert_eq!(transport.available_blocks(), 512);

    transport.fini().unwrap();
}
