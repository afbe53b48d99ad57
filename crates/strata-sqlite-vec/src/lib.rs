//! Registers the `sqlite-vec` extension for every SQLite connection opened
//! by this process.
//!
//! Vector search and the fused hybrid statement both call
//! `vec_distance_cosine`, so the extension must be registered before the
//! store opens its connection.

use std::sync::OnceLock;

const AUTO_ENABLE_ENV: &str = "STRATA_SQLITE_VEC_AUTO";

static REGISTRATION: OnceLock<Result<(), String>> = OnceLock::new();

/// Register `sqlite-vec` as an auto extension, once per process.
///
/// Connections opened before this call do not see the extension.
///
/// # Errors
///
/// Returns an error when registration is disabled through
/// `STRATA_SQLITE_VEC_AUTO=0|false|off` or when SQLite rejects the entry point.
pub fn register_auto_extension() -> Result<(), String> {
    if matches!(
        std::env::var(AUTO_ENABLE_ENV).ok().as_deref(),
        Some("0" | "false" | "off")
    ) {
        return Err(format!(
            "sqlite-vec auto-extension disabled by {AUTO_ENABLE_ENV}"
        ));
    }

    REGISTRATION.get_or_init(register_once).clone()
}

/// Report whether `vec_version()` resolves on the given connection.
#[must_use]
pub fn is_available(conn: &rusqlite::Connection) -> bool {
    conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
        .is_ok()
}

fn register_once() -> Result<(), String> {
    #[allow(clippy::transmute_ptr_to_ptr)]
    let entrypoint: unsafe extern "C" fn(
        *mut rusqlite::ffi::sqlite3,
        *mut *const std::os::raw::c_char,
        *const rusqlite::ffi::sqlite3_api_routines,
    ) -> std::os::raw::c_int =
        unsafe { std::mem::transmute(sqlite_vec::sqlite3_vec_init as *const ()) };

    let rc = unsafe { rusqlite::ffi::sqlite3_auto_extension(Some(entrypoint)) };
    if rc == rusqlite::ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(format!("sqlite3_auto_extension failed with rc={rc}"))
    }
}
