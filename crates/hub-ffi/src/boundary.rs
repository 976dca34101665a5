//! Process-wide boundary functions.
//!
//! One hub per process, started with [`StartHub`] or [`TestStartHub`] and
//! polled with [`GetMessages`]. No handler is installed, so every inbound application
//! frame lands in the boundary queue.
//!
//! `GetMessages` output is packed as `[len: u32 LE][payload]` entries; use
//! [`peer_hub::split_drained`] to walk it from Rust.

#![allow(non_snake_case)]

use std::os::raw::c_int;

use bytes::Bytes;
use hub_crypto::{account, AccountKey, AccountKeyPair, TransportFingerprint, TransportKeyPair};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use peer_hub::{HubConfig, PeerHub, PeerHubApi};
use tracing::{info, warn};

use crate::config::{hub_config, hub_config_at, secret};
use crate::runtime::{bytes, c_len, runtime, utf8};
use crate::FfiError;

/// Returned by [`GetMessages`] when nothing is queued.
pub const NOT_READY: c_int = -1;

lazy_static! {
    static ref BOUNDARY_HUB: Mutex<Option<PeerHub>> = Mutex::new(None);
}

// =============================================================================
// SAFE API
// =============================================================================

/// Start the process-wide hub and register it under the account derived
/// from the same secret.
///
/// `key_hex` is the transport secret. Blocks until the listener is bound.
/// A hub that is already running is stopped first.
pub fn start_hub(bootstrap_csv: &str, key_hex: &str) -> Result<TransportFingerprint, FfiError> {
    let seed = secret(key_hex.as_bytes())?;
    let identity = TransportKeyPair::from_seed(seed);
    let fingerprint = identity.fingerprint();
    let config = hub_config(bootstrap_csv, fingerprint)?;

    let account = launch(config, identity, |hub| {
        let signature = account::sign(fingerprint.as_bytes(), &seed)?;
        Ok(hub.register(&signature)?)
    })?;
    info!(%fingerprint, %account, "Boundary hub started");
    Ok(fingerprint)
}

/// Start the process-wide hub on `listen` under a fresh transport identity.
///
/// The hub is not registered under any account; it reaches and is reached
/// by the bootstrap set. Blocks until the listener is bound. A hub that is
/// already running is stopped first.
pub fn start_hub_at(listen: &str, bootstrap_csv: &str) -> Result<TransportFingerprint, FfiError> {
    let identity = TransportKeyPair::generate();
    let fingerprint = identity.fingerprint();
    let config = hub_config_at(listen, bootstrap_csv)?;

    launch(config, identity, |_| Ok(()))?;
    info!(%fingerprint, %listen, "Boundary hub started");
    Ok(fingerprint)
}

/// Replace the process-wide hub with one running `config`.
fn launch<T>(
    config: HubConfig,
    identity: TransportKeyPair,
    prepare: impl FnOnce(&PeerHub) -> Result<T, FfiError>,
) -> Result<T, FfiError> {
    let runtime = runtime()?;
    if let Some(previous) = BOUNDARY_HUB.lock().take() {
        warn!(fingerprint = %previous.fingerprint(), "Replacing running boundary hub");
        previous.stop();
    }

    let hub = PeerHub::spawn(runtime.handle(), config, identity)?;
    let prepared = prepare(&hub)?;
    runtime.block_on(hub.wait_bound())?;
    *BOUNDARY_HUB.lock() = Some(hub);
    Ok(prepared)
}

/// Account key the boundary hub registers for `key_hex`.
pub fn account_for(key_hex: &str) -> Result<AccountKey, FfiError> {
    Ok(AccountKeyPair::from_bytes(&secret(key_hex.as_bytes())?)?.account_key())
}

/// Send reliably to `target`, or to the whole bootstrap set when `target`
/// is empty or all zeros.
///
/// Returns the number of recipients addressed.
pub fn send_message(target: &[u8], payload: &[u8]) -> Result<usize, FfiError> {
    let Some(hub) = BOUNDARY_HUB.lock().clone() else {
        return Err(FfiError::Hub(peer_hub::HubError::Stopped));
    };
    let payload = Bytes::copy_from_slice(payload);

    if target.iter().all(|b| *b == 0) {
        return Ok(hub.broadcast(payload, true));
    }
    let account = AccountKey::from_slice(target)?;
    hub.send_message_to_peer(&account, payload, true);
    Ok(1)
}

/// Drain queued frames into `buf`; `None` when nothing is ready or no hub is
/// running.
pub fn get_messages(buf: &mut [u8]) -> Option<usize> {
    let hub = BOUNDARY_HUB.lock().clone()?;
    hub.get_messages(buf)
}

/// Stop the process-wide hub. Does nothing when none is running.
pub fn stop_hub() {
    if let Some(hub) = BOUNDARY_HUB.lock().take() {
        hub.stop();
    }
}

/// Change the log filter, e.g. `"debug"` or `"peer_hub=trace"`.
pub fn set_log_level(directives: &str) -> Result<(), FfiError> {
    runtime()?;
    hub_telemetry::set_log_level(directives).map_err(|e| {
        FfiError::Config(peer_hub::ConfigError::InvalidValue {
            field: "log_level",
            reason: e.to_string(),
        })
    })
}

// =============================================================================
// C SYMBOLS
// =============================================================================

/// Start the process-wide hub listening on `address` (`host:port`, an
/// optional `scheme://` prefix is ignored) with a bootstrap CSV.
///
/// # Safety
///
/// Pointers must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn StartHub(
    address: *const u8,
    address_len: c_int,
    bootstrap: *const u8,
    bootstrap_len: c_int,
) -> bool {
    let started = utf8(address, c_len(address_len), "address").and_then(|address| {
        let csv = utf8(bootstrap, c_len(bootstrap_len), "bootstrap")?;
        start_hub_at(address, csv)
    });
    match started {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "StartHub failed");
            false
        }
    }
}

/// Start the process-wide hub from a bootstrap CSV and a hex secret.
///
/// # Safety
///
/// Pointers must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn TestStartHub(
    bootstrap: *const u8,
    bootstrap_len: c_int,
    key_hex: *const u8,
    key_hex_len: c_int,
) -> bool {
    let started = utf8(bootstrap, c_len(bootstrap_len), "bootstrap").and_then(|csv| {
        let key = utf8(key_hex, c_len(key_hex_len), "key")?;
        start_hub(csv, key)
    });
    match started {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "TestStartHub failed");
            false
        }
    }
}

/// Send a payload; an all-zero target broadcasts to the bootstrap set.
///
/// # Safety
///
/// Pointers must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn SendMessage(
    target: *const u8,
    target_len: c_int,
    payload: *const u8,
    payload_len: c_int,
) {
    let sent = bytes(target, c_len(target_len), "target").and_then(|target| {
        let payload = bytes(payload, c_len(payload_len), "payload")?;
        send_message(target, payload)
    });
    if let Err(e) = sent {
        warn!(error = %e, "SendMessage failed");
    }
}

/// Drain queued frames into `buf`. Returns the frame count or
/// [`NOT_READY`].
///
/// # Safety
///
/// `buf` must be valid for writes of `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn GetMessages(buf: *mut u8, buf_len: c_int) -> c_int {
    let len = c_len(buf_len);
    if buf.is_null() || len == 0 {
        return NOT_READY;
    }
    let buf = std::slice::from_raw_parts_mut(buf, len);
    match get_messages(buf) {
        Some(count) => c_int::try_from(count).unwrap_or(c_int::MAX),
        None => NOT_READY,
    }
}

/// Stop the process-wide hub.
#[no_mangle]
pub extern "C" fn StopHub() {
    stop_hub();
}

/// Set the log filter from a UTF-8 string.
///
/// # Safety
///
/// `ptr` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn LogLevel(ptr: *const u8, len: c_int) {
    let applied = utf8(ptr, c_len(len), "log level").and_then(set_log_level);
    if let Err(e) = applied {
        warn!(error = %e, "LogLevel failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peer_hub::split_drained;
    use std::time::Duration;

    // Tests below share the process-wide hub.
    static SERIAL: Mutex<()> = Mutex::new(());

    #[test]
    fn test_boundary_round_trip_through_own_account() {
        let _serial = SERIAL.lock();
        let key = "33".repeat(32);
        let bootstrap = "";
        assert!(unsafe {
            TestStartHub(bootstrap.as_ptr(), 0, key.as_ptr(), key.len() as c_int)
        });

        let mut buf = vec![0u8; 256];
        assert_eq!(unsafe { GetMessages(buf.as_mut_ptr(), buf.len() as c_int) }, NOT_READY);

        let account = account_for(&key).unwrap();
        let payload = b"boundary";
        unsafe {
            SendMessage(
                account.as_bytes().as_ptr(),
                account.as_bytes().len() as c_int,
                payload.as_ptr(),
                payload.len() as c_int,
            )
        };

        let mut drained = NOT_READY;
        for _ in 0..500 {
            drained = unsafe { GetMessages(buf.as_mut_ptr(), buf.len() as c_int) };
            if drained != NOT_READY {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(drained, 1);
        assert_eq!(split_drained(&buf, 1), vec![&payload[..]]);

        // Nobody else in the bootstrap set.
        assert_eq!(send_message(&[0u8; 33], b"all").unwrap(), 0);

        StopHub();
        StopHub();
        assert!(get_messages(&mut buf).is_none());
    }

    #[test]
    fn test_start_hub_listens_on_given_address() {
        let _serial = SERIAL.lock();
        let address = "tcp://127.0.0.1:0";
        assert!(unsafe {
            StartHub(address.as_ptr(), address.len() as c_int, std::ptr::null(), 0)
        });
        let hub = BOUNDARY_HUB.lock().clone().unwrap();
        assert!(hub.local_addr().unwrap().ip().is_loopback());
        assert!(hub.get_id().is_some());
        StopHub();

        let bad = "not an address";
        assert!(!unsafe { StartHub(bad.as_ptr(), bad.len() as c_int, std::ptr::null(), 0) });
    }

    #[test]
    fn test_log_level_rejects_garbage() {
        assert!(set_log_level("peer_hub=loud").is_err());
    }
}
