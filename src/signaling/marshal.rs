//! Request/response marshalling across the foreign boundary
//!
//! Structured values cross the boundary only as canonical JSON text.
//!
//! Buffer ownership:
//! - Text passed *into* a callback is borrowed for the duration of the call.
//!   The bridge keeps the `CString` alive until the callback returns.
//! - Text *returned* by a callback belongs to the caller's allocator. It is
//!   wrapped in [`ForeignText`] and handed back exactly once through the
//!   table's `release_string` entry.
//! - Text returned *by the library* (id getters) comes from
//!   [`into_foreign`] and must be handed back exactly once through
//!   `rtc_string_free`, which calls [`release_owned`].

use std::ffi::{CStr, CString};

use libc::{c_char, c_void};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{BridgeError, Result};

/// Release entry for caller-allocated text.
pub type ReleaseFn = unsafe extern "C" fn(ctx: *const c_void, text: *mut c_char);

/// Serialize a value to its canonical text form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<CString> {
    let text = serde_json::to_string(value)?;
    to_c_string(text)
}

/// Parse a canonical text form back into a value.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

/// Plain string argument (ids, labels, state text).
pub fn to_c_string(text: impl Into<Vec<u8>>) -> Result<CString> {
    CString::new(text)
        .map_err(|e| BridgeError::InvalidParameters(format!("interior NUL in text: {}", e)))
}

/// Borrow caller-owned text for the duration of a call.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for `'a`.
pub unsafe fn borrow_text<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(BridgeError::ContractViolation(format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| BridgeError::ContractViolation(format!("{} is not valid UTF-8", what)))
}

/// Text allocated by the foreign side and returned from a callback.
///
/// Released through the paired release entry when dropped.
pub struct ForeignText {
    ptr: *mut c_char,
    ctx: *const c_void,
    release: ReleaseFn,
}

impl ForeignText {
    /// Take ownership of a returned text pointer.
    ///
    /// A null pointer is a contract violation; there is nothing to release.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a NUL-terminated string the caller expects to
    /// get back through `release`.
    pub unsafe fn take(
        ptr: *mut c_char,
        ctx: *const c_void,
        release: ReleaseFn,
        what: &str,
    ) -> Result<Self> {
        if ptr.is_null() {
            return Err(BridgeError::ContractViolation(format!(
                "{} returned null",
                what
            )));
        }
        Ok(Self { ptr, ctx, release })
    }

    pub fn as_str(&self) -> Result<&str> {
        // Safety: non-null and owned until drop
        unsafe { CStr::from_ptr(self.ptr) }
            .to_str()
            .map_err(|_| BridgeError::ContractViolation("returned text is not valid UTF-8".into()))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        decode(self.as_str()?)
    }
}

impl Drop for ForeignText {
    fn drop(&mut self) {
        unsafe { (self.release)(self.ctx, self.ptr) };
    }
}

/// Hand library-allocated text to the caller.
pub fn into_foreign(text: &str) -> Result<*mut c_char> {
    Ok(to_c_string(text)?.into_raw())
}

/// Free text produced by [`into_foreign`].
///
/// # Safety
///
/// `ptr` must be null or come from [`into_foreign`] and not have been
/// released before.
pub unsafe fn release_owned(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}
