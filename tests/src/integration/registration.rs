//! # Registration Scenarios
//!
//! How registrations spread and how the registry defends itself:
//!
//! 1. **Forged announcement**: a record whose signature does not recover the
//!    claimed account is refused and never displaces the genuine binding
//! 2. **Genuine announcement** from a raw transport host is installed
//! 3. **Rediscovery**: a hub that never heard an account's announcement
//!    learns it by querying its bootstrap peers
//! 4. **Stale record**: a cached binding to a dead identity is dropped and
//!    replaced from the bootstrap peers
//! 5. **Replayed record**: an older, validly signed record relayed after a
//!    newer one never rolls the binding back

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use hub_crypto::{AccountKeyPair, TransportKeyPair};
    use peer_hub::domain::{Announcement, RegistrationRecord};
    use peer_hub::transport::{InboundStream, TransportHost};
    use peer_hub::{BootstrapDirectory, Frame, FrameKind, HubConfig, PeerHubApi, TransportError};
    use tokio::sync::{mpsc, watch};

    use crate::harness::{
        directory, eventually, loopback, register, start_node, start_registered, Inbox,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const SHORT: Duration = Duration::from_secs(10);
    const LONG: Duration = Duration::from_secs(30);

    /// A bare transport host speaking the wire protocol without a hub.
    struct RawPeer {
        host: Arc<TransportHost>,
        identity: TransportKeyPair,
        identity_fingerprint: hub_crypto::TransportFingerprint,
        _inbound: mpsc::Receiver<InboundStream>,
        _shutdown: watch::Sender<bool>,
    }

    impl RawPeer {
        fn bind(bootstrap: BootstrapDirectory) -> Self {
            let identity = TransportKeyPair::generate();
            let identity_fingerprint = identity.fingerprint();
            let (tx, rx) = mpsc::channel(16);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let config = Arc::new(HubConfig::for_testing(loopback(), bootstrap));
            let host = TransportHost::bind(config, identity.clone(), tx, shutdown_rx).unwrap();
            Self {
                host,
                identity,
                identity_fingerprint,
                _inbound: rx,
                _shutdown: shutdown_tx,
            }
        }

        fn announcement(&self, record: RegistrationRecord) -> Frame {
            let announcement = Announcement {
                record,
                addr: Some(self.host.local_addr()),
            };
            Frame::new(FrameKind::Announcement, announcement.encode())
        }
    }

    // =============================================================================
    // ANNOUNCEMENTS
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_forged_announcement_is_refused() {
        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let (b, victim) = start_registered(directory(&[&a])).await.unwrap();
        assert!(eventually(SHORT, || a.resolve(&victim.account_key()) == Some(b.fingerprint())).await);

        // Claim the victim's account for our own fingerprint, signed by a key
        // that is not the victim's.
        let attacker = RawPeer::bind(directory(&[&a]));
        let forger = AccountKeyPair::generate();
        let signature = forger
            .sign(attacker.identity_fingerprint.as_bytes())
            .unwrap();
        let forged = RegistrationRecord::new(victim.account_key(), &attacker.identity, signature, u64::MAX);
        assert!(!forged.verify());

        let result = attacker
            .host
            .send_frame(a.fingerprint(), &attacker.announcement(forged))
            .await;
        assert!(matches!(result, Err(TransportError::Rejected)));
        assert_eq!(a.resolve(&victim.account_key()), Some(b.fingerprint()));

        // Traffic for the victim still reaches the genuine hub.
        let inbox = Inbox::new();
        inbox.attach(&b);
        a.send_message_to_peer(&victim.account_key(), Bytes::from_static(b"still mine"), true);
        assert!(eventually(SHORT, || inbox.contains(b"still mine")).await);

        attacker.host.close();
        a.stop();
        b.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_genuine_announcement_from_raw_peer_is_installed() {
        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let peer = RawPeer::bind(directory(&[&a]));
        let account = AccountKeyPair::generate();
        let record = RegistrationRecord::recover(
            &peer.identity,
            account.sign(peer.identity_fingerprint.as_bytes()).unwrap(),
            1,
        )
        .unwrap();

        let answer = peer
            .host
            .send_frame(a.fingerprint(), &peer.announcement(record))
            .await
            .unwrap();
        assert!(answer.is_empty());
        assert_eq!(a.resolve(&account.account_key()), Some(peer.identity_fingerprint));

        peer.host.close();
        a.stop();
    }

    // =============================================================================
    // REDISCOVERY
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unknown_account_is_learned_from_bootstrap() {
        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let (b, b_account) = start_registered(directory(&[&a])).await.unwrap();
        let inbox = Inbox::new();
        inbox.attach(&b);
        assert!(eventually(SHORT, || a.resolve(&b_account.account_key()).is_some()).await);

        // C only knows A; B never announced to C.
        let c = start_node(directory(&[&a])).await.unwrap();
        assert_eq!(c.resolve(&b_account.account_key()), None);

        c.send_message_to_peer(&b_account.account_key(), Bytes::from_static(b"found you"), true);

        assert!(eventually(SHORT, || inbox.contains(b"found you")).await);
        assert_eq!(c.resolve(&b_account.account_key()), Some(b.fingerprint()));

        a.stop();
        b.stop();
        c.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stale_record_is_replaced_from_bootstrap() {
        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let account = AccountKeyPair::generate();

        let b1 = start_node(directory(&[&a])).await.unwrap();
        register(&b1, &account).unwrap();
        assert!(eventually(SHORT, || a.resolve(&account.account_key()).is_some()).await);

        // C caches the first binding through a delivered message.
        let c = start_node(directory(&[&a])).await.unwrap();
        let first = Inbox::new();
        first.attach(&b1);
        c.send_message_to_peer(&account.account_key(), Bytes::from_static(b"one"), true);
        assert!(eventually(SHORT, || first.contains(b"one")).await);
        assert_eq!(c.resolve(&account.account_key()), Some(b1.fingerprint()));

        b1.stop();
        drop(b1);

        let b2 = start_node(directory(&[&a])).await.unwrap();
        let second = Inbox::new();
        second.attach(&b2);
        register(&b2, &account).unwrap();
        assert!(eventually(SHORT, || a.resolve(&account.account_key()) == Some(b2.fingerprint())).await);

        // C still points at the dead identity until its send fails.
        c.send_message_to_peer(&account.account_key(), Bytes::from_static(b"two"), true);
        assert!(eventually(LONG, || second.contains(b"two")).await);
        assert_eq!(c.resolve(&account.account_key()), Some(b2.fingerprint()));

        a.stop();
        b2.stop();
        c.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replayed_old_record_does_not_roll_back() {
        let (a, _) = start_registered(BootstrapDirectory::default()).await.unwrap();
        let account = AccountKeyPair::generate();

        // A first identity registers; a relay keeps a copy of its record.
        let old = RawPeer::bind(directory(&[&a]));
        let old_record = RegistrationRecord::recover(
            &old.identity,
            account.sign(old.identity_fingerprint.as_bytes()).unwrap(),
            1,
        )
        .unwrap();
        old.host
            .send_frame(a.fingerprint(), &old.announcement(old_record))
            .await
            .unwrap();
        assert_eq!(a.resolve(&account.account_key()), Some(old.identity_fingerprint));

        // The account moves to a hub that registers later.
        let b = start_node(directory(&[&a])).await.unwrap();
        register(&b, &account).unwrap();
        assert!(eventually(SHORT, || a.resolve(&account.account_key()) == Some(b.fingerprint())).await);

        // Replaying the old record is acknowledged and changes nothing.
        let relay = RawPeer::bind(directory(&[&a]));
        let answer = relay
            .host
            .send_frame(a.fingerprint(), &relay.announcement(old_record))
            .await;
        assert!(answer.is_ok());
        assert_eq!(a.resolve(&account.account_key()), Some(b.fingerprint()));

        old.host.close();
        relay.host.close();
        a.stop();
        b.stop();
    }
}
