//! Tests for the transport host over loopback QUIC.

use super::*;
use crate::config::BootstrapDirectory;
use crate::domain::FrameKind;
use std::time::Duration;

struct TestHost {
    host: Arc<TransportHost>,
    inbound: mpsc::Receiver<InboundStream>,
    _shutdown: watch::Sender<bool>,
}

fn bind_host() -> TestHost {
    let config = Arc::new(HubConfig::for_testing(
        "127.0.0.1:0".parse().unwrap(),
        BootstrapDirectory::default(),
    ));
    let (tx, inbound) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let host = TransportHost::bind(config, TransportKeyPair::generate(), tx, shutdown_rx).unwrap();
    host.spawn_accept_loop();
    TestHost {
        host,
        inbound,
        _shutdown: shutdown_tx,
    }
}

/// Answer every inbound stream with `ack`, forwarding decoded frames.
fn respond_with(mut inbound: mpsc::Receiver<InboundStream>, ack: u8) -> mpsc::UnboundedReceiver<(TransportFingerprint, Frame)> {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(mut stream) = inbound.recv().await {
            let bytes = stream.recv.read_to_end(1 << 20).await.unwrap();
            let frame = Frame::decode(&bytes, 1 << 20).unwrap();
            stream.send.write_all(&[ack]).await.unwrap();
            stream.send.finish().unwrap();
            let _ = seen_tx.send((stream.remote, frame));
        }
    });
    seen_rx
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frame_exchange_is_acknowledged() {
    let a = bind_host();
    let b = bind_host();
    a.host.observe(b.host.fingerprint(), b.host.local_addr());
    let mut seen = respond_with(b.inbound, 0x00);

    let frame = Frame::application(&b"ping"[..]);
    let body = a.host.send_frame(b.host.fingerprint(), &frame).await.unwrap();
    assert!(body.is_empty());

    let (from, received) = tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, a.host.fingerprint());
    assert_eq!(received, frame);
    assert_eq!(a.host.link_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accepting_side_learns_dialer_address() {
    let a = bind_host();
    let b = bind_host();
    a.host.observe(b.host.fingerprint(), b.host.local_addr());
    let _seen = respond_with(b.inbound, 0x00);

    a.host
        .send_frame(b.host.fingerprint(), &Frame::new(FrameKind::Query, Bytes::new()))
        .await
        .unwrap();
    assert_eq!(
        b.host.address_of(&a.host.fingerprint()),
        Some(a.host.local_addr())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_acknowledgement() {
    let a = bind_host();
    let b = bind_host();
    a.host.observe(b.host.fingerprint(), b.host.local_addr());
    let _seen = respond_with(b.inbound, 0x01);

    let err = a
        .host
        .send_frame(b.host.fingerprint(), &Frame::application(&b"x"[..]))
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Rejected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_identity_fails_fast() {
    let a = bind_host();
    let b = bind_host();
    let gone = TransportKeyPair::generate().fingerprint();
    // The address of a vanished identity now hosts b.
    a.host.observe(gone, b.host.local_addr());

    let started = std::time::Instant::now();
    let err = a.host.link(gone).await.unwrap_err();
    assert!(err.is_stale(), "{err}");
    assert!(matches!(err, TransportError::StaleIdentity { .. }));
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(a.host.address_of(&gone), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_address_is_unreachable() {
    let a = bind_host();
    let stranger = TransportKeyPair::generate().fingerprint();
    let err = a.host.link(stranger).await.unwrap_err();
    assert!(matches!(err, TransportError::Unreachable { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dialing_self_is_refused() {
    let a = bind_host();
    let err = a.host.link(a.host.fingerprint()).await.unwrap_err();
    assert!(matches!(err, TransportError::Unreachable { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hint_never_overrides_observation() {
    let a = bind_host();
    let fp = TransportKeyPair::generate().fingerprint();
    let observed: SocketAddr = "127.0.0.1:4000".parse().unwrap();
    a.host.observe(fp, observed);
    a.host.hint(fp, "127.0.0.1:5000".parse().unwrap());
    assert_eq!(a.host.address_of(&fp), Some(observed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_drops_links() {
    let a = bind_host();
    let b = bind_host();
    a.host.observe(b.host.fingerprint(), b.host.local_addr());
    let _seen = respond_with(b.inbound, 0x00);

    a.host
        .send_frame(b.host.fingerprint(), &Frame::application(&b"x"[..]))
        .await
        .unwrap();
    a.host.close();
    assert_eq!(a.host.link_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dial_state_is_pruned() {
    let a = bind_host();
    let b = bind_host();
    a.host.observe(b.host.fingerprint(), b.host.local_addr());
    let _seen = respond_with(b.inbound, 0x00);

    a.host.link(b.host.fingerprint()).await.unwrap();
    assert_eq!(a.host.dial_state_len(), (0, 0));

    // A vanished identity leaves a failure mark only until its backoff runs out.
    let gone = TransportKeyPair::generate().fingerprint();
    assert!(a.host.link(gone).await.is_err());
    assert_eq!(a.host.dial_state_len(), (0, 1));
    tokio::time::sleep(a.host.config.dial_failure_backoff() + Duration::from_millis(50)).await;
    assert!(a.host.link(gone).await.is_err());
    let stranger = TransportKeyPair::generate().fingerprint();
    assert!(a.host.link(stranger).await.is_err());
    assert_eq!(a.host.dial_state_len(), (0, 2));

    tokio::time::sleep(a.host.config.dial_failure_backoff() + Duration::from_millis(50)).await;
    a.host.mark_dial_failed(TransportKeyPair::generate().fingerprint());
    assert_eq!(a.host.dial_state_len(), (0, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_binding_is_per_connection() {
    let a = bind_host();
    let b = bind_host();
    let c = bind_host();
    a.host.observe(b.host.fingerprint(), b.host.local_addr());
    a.host.observe(c.host.fingerprint(), c.host.local_addr());
    let _seen_b = respond_with(b.inbound, 0x00);
    let _seen_c = respond_with(c.inbound, 0x00);

    let to_b = a.host.link(b.host.fingerprint()).await.unwrap();
    let to_c = a.host.link(c.host.fingerprint()).await.unwrap();
    let mut at_b = None;
    for _ in 0..100 {
        at_b = b.host.live_link(&a.host.fingerprint());
        if at_b.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let at_b = at_b.expect("acceptor installed the link");

    let dialer_side = handshake::session_binding(&to_b.connection).unwrap();
    let acceptor_side = handshake::session_binding(&at_b.connection).unwrap();
    let other_session = handshake::session_binding(&to_c.connection).unwrap();
    assert_eq!(dialer_side, acceptor_side);
    assert_ne!(dialer_side, other_session);
}
