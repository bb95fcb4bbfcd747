// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! C ABI shim for legacy Cynara callers, rebased onto
//! [`cynagora_client`] instead of the original `cynagora` client
//! socket library. Covers the synchronous `cynara_*` check surface
//! mechanically; the async, admin, and credentials-helper surfaces are
//! not ported.
#![deny(missing_docs)]
#![allow(unsafe_code)]

use cynagora_client::{CheckClient, ClientError, Query};
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;

/// `CYNARA_API_SUCCESS` — the call completed normally.
pub const CYNARA_API_SUCCESS: c_int = 0;
/// `CYNARA_API_ACCESS_DENIED` — the checked access is denied.
pub const CYNARA_API_ACCESS_DENIED: c_int = 1;
/// `CYNARA_API_ACCESS_ALLOWED` — the checked access is allowed.
pub const CYNARA_API_ACCESS_ALLOWED: c_int = 2;
/// `CYNARA_API_INVALID_PARAM` — a pointer argument was null or not
/// valid UTF-8.
pub const CYNARA_API_INVALID_PARAM: c_int = 3;
/// `CYNARA_API_SERVICE_NOT_AVAILABLE` — the check socket could not be
/// reached.
pub const CYNARA_API_SERVICE_NOT_AVAILABLE: c_int = 4;
/// `CYNARA_API_UNKNOWN_ERROR` — any other failure.
pub const CYNARA_API_UNKNOWN_ERROR: c_int = 5;

fn from_client_error(_: &ClientError) -> c_int {
    CYNARA_API_SERVICE_NOT_AVAILABLE
}

/// Opaque handle standing in for the legacy `cynara` struct, holding a
/// live connection to the check socket.
pub struct cynara {
    client: CheckClient,
}

/// Open a connection to the daemon's check socket, storing it in
/// `*pp_cynara`. The `p_conf` configuration pointer is accepted for
/// signature compatibility and otherwise ignored — cache sizing is
/// fixed on the `cynagora-client` side.
///
/// # Safety
/// `pp_cynara` must be a valid, non-null pointer to a location that
/// may receive the new handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cynara_initialize(pp_cynara: *mut *mut cynara) -> c_int {
    if pp_cynara.is_null() {
        return CYNARA_API_INVALID_PARAM;
    }
    let path = default_check_socket();
    match CheckClient::connect(&path) {
        Ok(client) => {
            unsafe {
                *pp_cynara = Box::into_raw(Box::new(cynara { client }));
            }
            CYNARA_API_SUCCESS
        }
        Err(e) => from_client_error(&e),
    }
}

/// Release a handle created by [`cynara_initialize`].
///
/// # Safety
/// `p_cynara` must be a pointer previously returned by
/// [`cynara_initialize`] that has not already been released, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cynara_finish(p_cynara: *mut cynara) -> c_int {
    if !p_cynara.is_null() {
        unsafe {
            drop(Box::from_raw(p_cynara));
        }
    }
    CYNARA_API_SUCCESS
}

unsafe fn key_from_raw(
    client: *const c_char,
    client_session: *const c_char,
    user: *const c_char,
    privilege: *const c_char,
) -> Option<Query> {
    Some(Query {
        client: unsafe { cstr_to_string(client)? },
        session: unsafe { cstr_to_string(client_session)? },
        user: unsafe { cstr_to_string(user)? },
        permission: unsafe { cstr_to_string(privilege)? },
    })
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok().map(str::to_owned)
}

/// Check whether `client`/`client_session`/`user` may use `privilege`,
/// following agent-directive rules and consulting the client-side
/// verdict cache.
///
/// # Safety
/// `p_cynara` must be a live handle from [`cynara_initialize`]; the
/// four string arguments must be null or valid, NUL-terminated UTF-8.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cynara_check(
    p_cynara: *mut cynara,
    client: *const c_char,
    client_session: *const c_char,
    user: *const c_char,
    privilege: *const c_char,
) -> c_int {
    check_impl(p_cynara, client, client_session, user, privilege, false)
}

/// Check without following agent-directive rules (Cynara's
/// `cynara_simple_check`, mapped onto `cynagorad`'s `test`).
///
/// # Safety
/// Same obligations as [`cynara_check`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cynara_simple_check(
    p_cynara: *mut cynara,
    client: *const c_char,
    client_session: *const c_char,
    user: *const c_char,
    privilege: *const c_char,
) -> c_int {
    check_impl(p_cynara, client, client_session, user, privilege, true)
}

unsafe fn check_impl(
    p_cynara: *mut cynara,
    client: *const c_char,
    client_session: *const c_char,
    user: *const c_char,
    privilege: *const c_char,
    simple: bool,
) -> c_int {
    let Some(handle) = (unsafe { p_cynara.as_mut() }) else {
        return CYNARA_API_INVALID_PARAM;
    };
    let Some(key) = (unsafe { key_from_raw(client, client_session, user, privilege) }) else {
        return CYNARA_API_INVALID_PARAM;
    };
    let result = if simple {
        handle.client.test(&key)
    } else {
        handle.client.check(&key, 0)
    };
    match result {
        Ok(verdict) if verdict.value == "yes" => CYNARA_API_ACCESS_ALLOWED,
        Ok(_) => CYNARA_API_ACCESS_DENIED,
        Err(e) => from_client_error(&e),
    }
}

/// Render `errnum` as a human-readable message into `buf`.
///
/// # Safety
/// `buf` must point to at least `buflen` writable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cynara_strerror(errnum: c_int, buf: *mut c_char, buflen: usize) -> c_int {
    if buf.is_null() || buflen == 0 {
        return CYNARA_API_INVALID_PARAM;
    }
    let message = match errnum {
        CYNARA_API_SUCCESS => "successful",
        CYNARA_API_ACCESS_DENIED => "access that was checked is denied",
        CYNARA_API_ACCESS_ALLOWED => "access that was checked is allowed",
        CYNARA_API_INVALID_PARAM => "parameter is malformed",
        CYNARA_API_SERVICE_NOT_AVAILABLE => "service is not available",
        _ => "unknown error",
    };
    let bytes = message.as_bytes();
    let n = bytes.len().min(buflen - 1);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), buf, n);
        *buf.add(n) = 0;
    }
    CYNARA_API_SUCCESS
}

fn default_check_socket() -> PathBuf {
    if let Ok(over) = std::env::var("CYNAGORA_SOCKET_CHECK") {
        if !over.is_empty() {
            return PathBuf::from(over);
        }
    }
    PathBuf::from("/var/run/cynagora/check")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_honors_env_override() {
        std::env::set_var("CYNAGORA_SOCKET_CHECK", "/tmp/custom-check");
        assert_eq!(default_check_socket(), PathBuf::from("/tmp/custom-check"));
        std::env::remove_var("CYNAGORA_SOCKET_CHECK");
    }

    #[test]
    fn strerror_writes_a_nul_terminated_message() {
        let mut buf = [1i8; 64];
        let rc = unsafe { cynara_strerror(CYNARA_API_ACCESS_DENIED, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(rc, CYNARA_API_SUCCESS);
        let text = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_str().unwrap();
        assert_eq!(text, "access that was checked is denied");
    }

    #[test]
    fn initialize_rejects_a_null_out_pointer() {
        let rc = unsafe { cynara_initialize(std::ptr::null_mut()) };
        assert_eq!(rc, CYNARA_API_INVALID_PARAM);
    }
}
