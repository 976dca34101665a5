//! # Boundary Queue Scenarios
//!
//! Hubs without a stream handler park inbound payloads for a foreign caller
//! to drain:
//!
//! 1. **Ordered drain**: sequential sends are drained in arrival order
//! 2. **Partial drain**: a buffer too small for everything takes whole frames
//!    only and leaves the rest queued
//! 3. **Eviction**: a full queue drops its oldest frames
//! 4. **Handler switch**: installing a handler stops queueing

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use hub_crypto::{AccountKeyPair, TransportKeyPair};
    use peer_hub::{split_drained, BootstrapDirectory, HubConfig, PeerHub, PeerHubApi};

    use crate::harness::{directory, eventually, loopback, register, settled, start_registered, Inbox};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const SHORT: Duration = Duration::from_secs(10);

    /// Sender plus a handler-less receiver with the given queue capacity.
    async fn queued_pair(capacity: usize) -> (PeerHub, PeerHub, AccountKeyPair) {
        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let mut config = HubConfig::for_testing(loopback(), directory(&[&a]));
        config.queue_capacity = capacity;
        let b = PeerHub::start(config, TransportKeyPair::generate()).await.unwrap();
        let account = AccountKeyPair::generate();
        register(&b, &account).unwrap();
        assert!(eventually(SHORT, || a.resolve(&account.account_key()).is_some()).await);
        (a, b, account)
    }

    /// Send one payload and wait for its acknowledgement.
    async fn send_acked(from: &PeerHub, to: &AccountKeyPair, payload: &'static [u8]) {
        from.send_message_to_peer(&to.account_key(), Bytes::from_static(payload), true);
        assert!(settled(from, SHORT).await);
    }

    fn drain(hub: &PeerHub, buf_len: usize) -> Vec<Vec<u8>> {
        let mut buf = vec![0u8; buf_len];
        match hub.get_messages(&mut buf) {
            Some(count) => split_drained(&buf, count).into_iter().map(<[u8]>::to_vec).collect(),
            None => Vec::new(),
        }
    }

    // =============================================================================
    // DRAINING
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sequential_sends_drain_in_order() {
        let (a, b, account) = queued_pair(16).await;
        for payload in [&b"first"[..], b"second", b"third"] {
            send_acked(&a, &account, payload).await;
        }

        assert_eq!(b.stats().queued_frames, 3);
        assert_eq!(
            drain(&b, 1024),
            vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
        );
        assert_eq!(b.get_messages(&mut [0u8; 64]), None);

        a.stop();
        b.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_small_buffer_takes_whole_frames_only() {
        let (a, b, account) = queued_pair(16).await;
        send_acked(&a, &account, b"0123456789").await;
        send_acked(&a, &account, b"abcdefghij").await;

        // Room for one prefixed frame and a half.
        assert_eq!(drain(&b, 4 + 10 + 7), vec![b"0123456789".to_vec()]);
        assert_eq!(b.stats().queued_frames, 1);
        assert_eq!(drain(&b, 64), vec![b"abcdefghij".to_vec()]);

        a.stop();
        b.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_full_queue_evicts_oldest() {
        let (a, b, account) = queued_pair(2).await;
        for payload in [&b"0"[..], b"1", b"2", b"3", b"4"] {
            send_acked(&a, &account, payload).await;
        }

        assert_eq!(b.stats().queued_frames, 2);
        assert_eq!(drain(&b, 64), vec![b"3".to_vec(), b"4".to_vec()]);

        a.stop();
        b.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handler_takes_over_from_queue() {
        let (a, b, account) = queued_pair(16).await;
        send_acked(&a, &account, b"queued").await;

        let inbox = Inbox::new();
        inbox.attach(&b);
        send_acked(&a, &account, b"handled").await;

        assert_eq!(inbox.snapshot(), vec![b"handled".to_vec()]);
        assert_eq!(drain(&b, 64), vec![b"queued".to_vec()]);

        b.clear_stream_handler();
        send_acked(&a, &account, b"queued again").await;
        assert!(eventually(SHORT, || b.stats().queued_frames == 1).await);
        assert_eq!(inbox.len(), 1);

        a.stop();
        b.stop();
    }
}
