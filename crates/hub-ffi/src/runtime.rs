//! Library-owned runtime and argument helpers.

use std::slice;

use hub_telemetry::{init_telemetry, TelemetryConfig};
use lazy_static::lazy_static;
use tokio::runtime::{Builder, Runtime};

use crate::FfiError;

lazy_static! {
    static ref RUNTIME: Option<Runtime> = Builder::new_multi_thread()
        .enable_all()
        .thread_name("peer-hub")
        .build()
        .ok();
}

/// Shared runtime, initializing logging on first use.
pub(crate) fn runtime() -> Result<&'static Runtime, FfiError> {
    let runtime = RUNTIME.as_ref().ok_or(FfiError::RuntimeUnavailable)?;
    // A host process may have installed its own subscriber.
    let _ = init_telemetry(TelemetryConfig::from_env());
    Ok(runtime)
}

/// Borrow `len` bytes at `ptr`. A zero length never dereferences.
///
/// # Safety
///
/// `ptr` must be valid for reads of `len` bytes for `'a`.
pub(crate) unsafe fn bytes<'a>(ptr: *const u8, len: usize, what: &'static str) -> Result<&'a [u8], FfiError> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(FfiError::NullPointer(what));
    }
    Ok(slice::from_raw_parts(ptr, len))
}

/// Borrow a UTF-8 string given as pointer and length.
///
/// # Safety
///
/// Same contract as [`bytes`].
pub(crate) unsafe fn utf8<'a>(ptr: *const u8, len: usize, what: &'static str) -> Result<&'a str, FfiError> {
    std::str::from_utf8(bytes(ptr, len, what)?).map_err(|_| FfiError::InvalidUtf8(what))
}

/// Signed C length to `usize`; negative lengths read as empty.
pub(crate) fn c_len(len: i32) -> usize {
    usize::try_from(len).unwrap_or(0)
}
