//! # Delivery Scenarios
//!
//! Account-addressed delivery between separate hubs:
//!
//! 1. **Single send**: one payload reaches the registered account's handler
//! 2. **Mass send**: 10,000 reliable sends from ten concurrent callers arrive
//!    exactly once each
//! 3. **Large frames**: payloads beyond a single datagram arrive intact;
//!    payloads beyond the receiver's frame limit are refused
//! 4. **Reconnect**: the recipient restarts under a new transport identity
//!    and re-registers the same account; reliable sends issued while it was
//!    down are delivered to the new identity
//! 5. **Mid-stream reconnect**: the recipient restarts while 10,000 reliable
//!    sends are in progress; the handler runs exactly 10,000 times

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use hub_crypto::AccountKeyPair;
    use peer_hub::{BootstrapDirectory, HubConfig, PeerHub, PeerHubApi};

    use crate::harness::{
        directory, eventually, loopback, register, restart_node, settled, start_node, start_registered,
        Inbox,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const SHORT: Duration = Duration::from_secs(10);
    const LONG: Duration = Duration::from_secs(90);

    /// Distinct payload for sequence number `n`.
    fn numbered(n: u32) -> Bytes {
        Bytes::copy_from_slice(&n.to_be_bytes())
    }

    /// Bootstrap node plus one registered validator announcing to it.
    async fn pair() -> (PeerHub, PeerHub, AccountKeyPair) {
        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let (b, b_account) = start_registered(directory(&[&a])).await.unwrap();
        let known = eventually(SHORT, || a.resolve(&b_account.account_key()) == Some(b.fingerprint())).await;
        assert!(known, "bootstrap never learned the validator's registration");
        (a, b, b_account)
    }

    // =============================================================================
    // SINGLE AND MASS SEND
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_send_reaches_account() {
        let (a, b, b_account) = pair().await;
        let inbox = Inbox::new();
        inbox.attach(&b);

        a.send_message_to_peer(&b_account.account_key(), Bytes::from_static(b"ping"), true);

        assert!(eventually(SHORT, || inbox.len() == 1).await);
        assert_eq!(inbox.snapshot(), vec![b"ping".to_vec()]);
        assert!(settled(&a, SHORT).await);

        a.stop();
        b.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mass_send_from_concurrent_callers_is_exactly_once() {
        const CALLERS: u32 = 10;
        const PER_CALLER: u32 = 1_000;
        const TOTAL: usize = (CALLERS * PER_CALLER) as usize;

        let (a, b, b_account) = pair().await;
        let inbox = Inbox::new();
        inbox.attach(&b);
        let target = b_account.account_key();

        let callers: Vec<_> = (0..CALLERS)
            .map(|caller| {
                let a = a.clone();
                tokio::task::spawn_blocking(move || {
                    for i in 0..PER_CALLER {
                        a.send_message_to_peer(&target, numbered(caller * PER_CALLER + i), true);
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.await.unwrap();
        }

        assert!(
            eventually(LONG, || inbox.len() >= TOTAL).await,
            "only {} of {TOTAL} delivered",
            inbox.len()
        );
        assert!(settled(&a, LONG).await);
        assert_eq!(inbox.len(), TOTAL);
        assert_eq!(inbox.distinct(), TOTAL);

        a.stop();
        b.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_best_effort_to_unknown_account_is_dropped() {
        let (a, b, _) = pair().await;
        let stranger = AccountKeyPair::generate().account_key();

        a.send_message_to_peer(&stranger, Bytes::from_static(b"lost"), false);

        assert!(settled(&a, SHORT).await);
        assert_eq!(a.stats().pending_sends, 0);
        a.stop();
        b.stop();
    }

    // =============================================================================
    // LARGE FRAMES
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_large_payload_arrives_intact() {
        let (a, b, b_account) = pair().await;
        let inbox = Inbox::new();
        inbox.attach(&b);

        let big: Vec<u8> = (0..6_000u32).map(|i| (i % 251) as u8).collect();
        a.send_message_to_peer(&b_account.account_key(), Bytes::from(big.clone()), true);

        assert!(eventually(SHORT, || inbox.len() == 1).await);
        assert_eq!(inbox.snapshot()[0], big);

        a.stop();
        b.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_oversized_payload_is_refused() {
        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let config = HubConfig::builder()
            .listen_addr(loopback())
            .bootstrap(directory(&[&a]))
            .max_frame_size(1_024)
            .build()
            .unwrap();
        let b = PeerHub::start(config, hub_crypto::TransportKeyPair::generate())
            .await
            .unwrap();
        let b_account = AccountKeyPair::generate();
        register(&b, &b_account).unwrap();
        let inbox = Inbox::new();
        inbox.attach(&b);
        assert!(eventually(SHORT, || a.resolve(&b_account.account_key()).is_some()).await);

        a.send_message_to_peer(&b_account.account_key(), Bytes::from(vec![1u8; 2_048]), true);
        // A refusal is final: nothing is left to retry.
        assert!(settled(&a, SHORT).await);
        assert!(inbox.is_empty());

        a.send_message_to_peer(&b_account.account_key(), Bytes::from(vec![2u8; 512]), true);
        assert!(eventually(SHORT, || inbox.len() == 1).await);

        a.stop();
        b.stop();
    }

    // =============================================================================
    // RECONNECT UNDER A NEW IDENTITY
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sends_survive_recipient_restart_with_new_identity() {
        const BATCH: u32 = 5_000;

        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let account = AccountKeyPair::generate();
        let inbox = Inbox::new();

        // First incarnation.
        let b1 = start_node(directory(&[&a])).await.unwrap();
        inbox.attach(&b1);
        register(&b1, &account).unwrap();
        assert!(eventually(SHORT, || a.resolve(&account.account_key()) == Some(b1.fingerprint())).await);

        for n in 0..BATCH {
            a.send_message_to_peer(&account.account_key(), numbered(n), true);
        }
        assert!(eventually(LONG, || inbox.len() >= BATCH as usize).await);
        assert!(settled(&a, LONG).await);

        b1.stop();
        drop(b1);

        // Sends issued while the account has no reachable identity.
        for n in BATCH..2 * BATCH {
            a.send_message_to_peer(&account.account_key(), numbered(n), true);
        }

        // Second incarnation: fresh transport key, same account.
        let b2 = start_node(directory(&[&a])).await.unwrap();
        inbox.attach(&b2);
        register(&b2, &account).unwrap();

        assert!(eventually(SHORT, || a.resolve(&account.account_key()) == Some(b2.fingerprint())).await);
        assert!(
            eventually(LONG, || inbox.distinct() >= 2 * BATCH as usize).await,
            "only {} distinct payloads delivered",
            inbox.distinct()
        );
        assert!(settled(&a, LONG).await);
        assert_eq!(inbox.distinct(), 2 * BATCH as usize);
        assert_eq!(inbox.len(), 2 * BATCH as usize);

        a.stop();
        b2.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mid_stream_restart_handles_each_send_once() {
        const TOTAL: u32 = 10_000;
        const RESTART_AFTER: usize = 2_000;

        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let account = AccountKeyPair::generate();
        let inbox = Inbox::new();

        let b1 = start_node(directory(&[&a])).await.unwrap();
        inbox.attach(&b1);
        register(&b1, &account).unwrap();
        assert!(eventually(SHORT, || a.resolve(&account.account_key()) == Some(b1.fingerprint())).await);

        let sender = {
            let a = a.clone();
            let target = account.account_key();
            tokio::task::spawn_blocking(move || {
                for n in 0..TOTAL {
                    a.send_message_to_peer(&target, numbered(n), true);
                }
            })
        };

        assert!(eventually(LONG, || inbox.len() >= RESTART_AFTER).await);
        let b2 = restart_node(&b1, directory(&[&a])).await.unwrap();
        b1.stop();
        drop(b1);
        inbox.attach(&b2);
        register(&b2, &account).unwrap();

        sender.await.unwrap();
        assert!(
            eventually(LONG, || inbox.len() >= TOTAL as usize).await,
            "only {} of {TOTAL} handled",
            inbox.len()
        );
        assert!(settled(&a, LONG).await);
        assert_eq!(inbox.len(), TOTAL as usize);
        assert_eq!(inbox.distinct(), TOTAL as usize);

        a.stop();
        b2.stop();
    }
}
