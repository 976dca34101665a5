//! Handle façade: one hub per opaque pointer.
//!
//! ```c
//! typedef void (*hub_callback)(void *ctx, const uint8_t *payload, size_t len);
//!
//! HubHandle *hub_new(const uint8_t *key, size_t key_len,
//!                    const uint8_t *bootstrap, size_t bootstrap_len);
//! int32_t    hub_get_id(HubHandle *, uint8_t *out, size_t out_cap);
//! bool       hub_register(HubHandle *, const uint8_t *sig, size_t sig_len);
//! void       hub_set_stream_handler(HubHandle *, hub_callback, void *ctx);
//! bool       hub_send_message_to_peer(HubHandle *, const uint8_t *account_hex, size_t hex_len,
//!                                     const uint8_t *payload, size_t len, bool reliable);
//! void       hub_stop(HubHandle *);
//! void       hub_free(HubHandle *);
//! ```

use std::ffi::c_void;

use bytes::Bytes;
use hub_crypto::{AccountSignature, TransportKeyPair};
use peer_hub::{MessageHandler, PeerHub, PeerHubApi};
use tracing::warn;

use crate::config::{hub_config, secret};
use crate::runtime::{bytes, runtime, utf8};
use crate::FfiError;

/// Callback receiving inbound payloads. The payload pointer is valid only
/// for the duration of the call.
pub type HubCallback = extern "C" fn(ctx: *mut c_void, payload: *const u8, len: usize);

/// Opaque hub handle.
pub struct HubHandle {
    hub: PeerHub,
}

impl HubHandle {
    /// Start a hub on the library runtime.
    pub fn new(key: &[u8], bootstrap_csv: &str) -> Result<Self, FfiError> {
        let identity = TransportKeyPair::from_seed(secret(key)?);
        let config = hub_config(bootstrap_csv, identity.fingerprint())?;
        let hub = PeerHub::spawn(runtime()?.handle(), config, identity)?;
        Ok(Self { hub })
    }

    /// The wrapped hub.
    pub fn hub(&self) -> &PeerHub {
        &self.hub
    }
}

/// Foreign callback plus its context pointer.
struct ForeignHandler {
    callback: HubCallback,
    ctx: *mut c_void,
}

// The caller of `hub_set_stream_handler` guarantees `ctx` may be used from
// any thread.
unsafe impl Send for ForeignHandler {}
unsafe impl Sync for ForeignHandler {}

impl MessageHandler for ForeignHandler {
    fn handle(&self, payload: &[u8]) {
        (self.callback)(self.ctx, payload.as_ptr(), payload.len());
    }
}

unsafe fn handle_ref<'a>(handle: *mut HubHandle) -> Option<&'a HubHandle> {
    handle.as_ref()
}

/// Create a hub. `key` is the 32-byte transport secret, raw or as hex text;
/// `bootstrap` is a comma-separated `fingerprint@host:port` list.
///
/// Returns null on invalid arguments. Bind failures are logged; the handle
/// then never reports an id.
///
/// # Safety
///
/// Pointers must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn hub_new(
    key: *const u8,
    key_len: usize,
    bootstrap: *const u8,
    bootstrap_len: usize,
) -> *mut HubHandle {
    let created = bytes(key, key_len, "key").and_then(|key| {
        let csv = utf8(bootstrap, bootstrap_len, "bootstrap")?;
        HubHandle::new(key, csv)
    });
    match created {
        Ok(handle) => Box::into_raw(Box::new(handle)),
        Err(e) => {
            warn!(error = %e, "hub_new failed");
            std::ptr::null_mut()
        }
    }
}

/// Copy the transport fingerprint into `out`.
///
/// Returns the number of bytes written, or `-1` while the listener is not
/// bound (or `out` is too small).
///
/// # Safety
///
/// `handle` must come from [`hub_new`]; `out` must be valid for `out_cap`
/// bytes.
#[no_mangle]
pub unsafe extern "C" fn hub_get_id(handle: *mut HubHandle, out: *mut u8, out_cap: usize) -> i32 {
    let Some(handle) = handle_ref(handle) else {
        return -1;
    };
    let Some(id) = handle.hub.get_id() else {
        return -1;
    };
    let id = id.as_bytes();
    if out.is_null() || out_cap < id.len() {
        return -1;
    }
    std::ptr::copy_nonoverlapping(id.as_ptr(), out, id.len());
    id.len() as i32
}

/// Register with a 65-byte recoverable signature over the fingerprint.
///
/// # Safety
///
/// `handle` must come from [`hub_new`]; `sig` must be valid for `sig_len`
/// bytes.
#[no_mangle]
pub unsafe extern "C" fn hub_register(handle: *mut HubHandle, sig: *const u8, sig_len: usize) -> bool {
    let Some(handle) = handle_ref(handle) else {
        return false;
    };
    let registered = bytes(sig, sig_len, "signature")
        .and_then(|sig| Ok(AccountSignature::from_slice(sig)?))
        .and_then(|sig| Ok(handle.hub.register(&sig)?));
    match registered {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "hub_register failed");
            false
        }
    }
}

/// Install `callback` as the inbound handler; a null callback removes it.
///
/// # Safety
///
/// `handle` must come from [`hub_new`]. `ctx` is passed back verbatim from
/// network threads and must stay valid until the handler is replaced or the
/// hub is freed.
#[no_mangle]
pub unsafe extern "C" fn hub_set_stream_handler(
    handle: *mut HubHandle,
    callback: Option<HubCallback>,
    ctx: *mut c_void,
) {
    let Some(handle) = handle_ref(handle) else {
        return;
    };
    match callback {
        Some(callback) => handle
            .hub
            .set_stream_handler(Box::new(ForeignHandler { callback, ctx })),
        None => handle.hub.clear_stream_handler(),
    }
}

/// Send `payload` to the account whose compressed key is given in hex.
///
/// Returns `false` only for invalid arguments; delivery is asynchronous.
///
/// # Safety
///
/// `handle` must come from [`hub_new`]; pointers must be valid for their
/// lengths.
#[no_mangle]
pub unsafe extern "C" fn hub_send_message_to_peer(
    handle: *mut HubHandle,
    account_hex: *const u8,
    account_hex_len: usize,
    payload: *const u8,
    payload_len: usize,
    reliable: bool,
) -> bool {
    let Some(handle) = handle_ref(handle) else {
        return false;
    };
    let sent = utf8(account_hex, account_hex_len, "account").and_then(|account| {
        let payload = Bytes::copy_from_slice(bytes(payload, payload_len, "payload")?);
        Ok(handle.hub.send_message_to_peer_hex(account, payload, reliable)?)
    });
    match sent {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "hub_send_message_to_peer failed");
            false
        }
    }
}

/// Stop the hub. The handle stays valid until [`hub_free`].
///
/// # Safety
///
/// `handle` must come from [`hub_new`].
#[no_mangle]
pub unsafe extern "C" fn hub_stop(handle: *mut HubHandle) {
    if let Some(handle) = handle_ref(handle) {
        handle.hub.stop();
    }
}

/// Stop and release the hub.
///
/// # Safety
///
/// `handle` must come from [`hub_new`] and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn hub_free(handle: *mut HubHandle) {
    if handle.is_null() {
        return;
    }
    let handle = Box::from_raw(handle);
    handle.hub.stop();
}
