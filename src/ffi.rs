//! FFI bindings for Synheart Vitals
//!
//! C-compatible functions for calling the engine from a host app.
//! All functions take null-terminated C strings and return allocated memory
//! that must be freed by the caller using `vitals_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::VitalsConfig;
use crate::error::VitalsError;
use crate::pipeline::{parse_profile, parse_records, snapshot_from_json, HealthSync};
use crate::provenance::classify;
use crate::sync::{last_sync_summary, FileSnapshotStore};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Return the result as a C string, or NULL with the last error set
fn finish(result: Result<String, VitalsError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn parse_now(now: Option<String>) -> Result<DateTime<Utc>, VitalsError> {
    match now {
        Some(s) if !s.trim().is_empty() => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| VitalsError::DateParseError(format!("{s}: {e}"))),
        _ => Ok(Utc::now()),
    }
}

fn config_for(timezone: Option<String>) -> Result<VitalsConfig, VitalsError> {
    let mut config = VitalsConfig::default();
    if let Some(tz) = timezone.filter(|tz| !tz.trim().is_empty()) {
        config.timezone = tz;
    }
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Snapshot API
// ============================================================================

/// Compute a snapshot from records and return it as JSON.
///
/// # Safety
/// - `records` must be a valid null-terminated C string holding a JSON array
///   or NDJSON of records.
/// - `profile`, `timezone` and `now` may be NULL. A NULL profile uses the
///   default profile, a NULL timezone means UTC, a NULL `now` means the
///   current time. `now` is RFC 3339.
/// - Returns a newly allocated string that must be freed with `vitals_free_string`.
/// - Returns NULL on error; call `vitals_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vitals_snapshot_json(
    records: *const c_char,
    profile: *const c_char,
    timezone: *const c_char,
    now: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let records_str = match cstr_to_string(records) {
        Some(s) => s,
        None => {
            set_last_error("Invalid records string pointer");
            return ptr::null_mut();
        }
    };
    let profile_str = cstr_to_string(profile);
    let tz_str = cstr_to_string(timezone);
    let now_str = cstr_to_string(now);

    finish((|| -> Result<String, VitalsError> {
        let config = config_for(tz_str)?;
        let now = parse_now(now_str)?;
        let snapshot = snapshot_from_json(&records_str, profile_str.as_deref(), &config, now)?;
        Ok(snapshot.to_json()?)
    })())
}

/// Compute a snapshot, persist it to `state_path`, and return it as JSON.
///
/// # Safety
/// - Same contract as `vitals_snapshot_json`.
/// - `state_path` must be a valid null-terminated C string.
/// - A failure to write the state file is not reported; the snapshot is
///   still returned.
#[no_mangle]
pub unsafe extern "C" fn vitals_sync_json(
    records: *const c_char,
    profile: *const c_char,
    timezone: *const c_char,
    now: *const c_char,
    state_path: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let records_str = match cstr_to_string(records) {
        Some(s) => s,
        None => {
            set_last_error("Invalid records string pointer");
            return ptr::null_mut();
        }
    };
    let state_str = match cstr_to_string(state_path) {
        Some(s) => s,
        None => {
            set_last_error("Invalid state_path string pointer");
            return ptr::null_mut();
        }
    };
    let profile_str = cstr_to_string(profile);
    let tz_str = cstr_to_string(timezone);
    let now_str = cstr_to_string(now);

    finish((|| -> Result<String, VitalsError> {
        let config = config_for(tz_str)?;
        let now = parse_now(now_str)?;
        let sync = HealthSync::from_config(
            Arc::new(parse_records(&records_str)?),
            Arc::new(parse_profile(profile_str.as_deref())?),
            Arc::new(FileSnapshotStore::new(state_str)),
            &config,
        )?;
        Ok(sync.get_snapshot_at(now).to_json()?)
    })())
}

/// Return the summary of the snapshot stored at `state_path` as JSON.
///
/// Returns the string `null` when nothing has been synced yet.
///
/// # Safety
/// - `state_path` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `vitals_free_string`.
/// - Returns NULL on error; call `vitals_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn vitals_last_sync_json(state_path: *const c_char) -> *mut c_char {
    clear_last_error();

    let state_str = match cstr_to_string(state_path) {
        Some(s) => s,
        None => {
            set_last_error("Invalid state_path string pointer");
            return ptr::null_mut();
        }
    };

    finish((|| -> Result<String, VitalsError> {
        let summary = last_sync_summary(&FileSnapshotStore::new(state_str))?;
        Ok(serde_json::to_string(&summary)?)
    })())
}

/// Classify a source id into its provenance tier.
///
/// # Safety
/// - `source_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string (`primary`, `secondary` or `other`)
///   that must be freed with `vitals_free_string`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn vitals_classify_source(source_id: *const c_char) -> *mut c_char {
    clear_last_error();

    match cstr_to_string(source_id) {
        Some(s) => string_to_cstr(classify(&s).as_str()),
        None => {
            set_last_error("Invalid source_id string pointer");
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Vitals functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Vitals function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn vitals_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Vitals function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn vitals_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn vitals_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn sample_records() -> CString {
        CString::new(
            r#"[
            {"source_id": "com.sec.android.app.shealth", "start_time": "2024-01-15T08:00:00Z", "end_time": "2024-01-15T09:00:00Z", "value": {"type": "steps", "count": 4000}},
            {"source_id": "com.google.android.apps.fitness", "start_time": "2024-01-15T08:00:00Z", "end_time": "2024-01-15T09:00:00Z", "value": {"type": "steps", "count": 6000}}
        ]"#,
        )
        .unwrap()
    }

    unsafe fn take(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        vitals_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_snapshot_json() {
        let records = sample_records();
        let tz = CString::new("America/New_York").unwrap();
        let now = CString::new("2024-01-15T17:00:00Z").unwrap();

        unsafe {
            let result = vitals_snapshot_json(records.as_ptr(), ptr::null(), tz.as_ptr(), now.as_ptr());
            let json: serde_json::Value = serde_json::from_str(&take(result)).unwrap();

            assert_eq!(json["metrics"]["steps"]["final_value"]["value"], 4000);
            assert_eq!(json["high_priority_source_present"], true);
            assert_eq!(json["window_start"], "2024-01-15T05:00:00Z");
        }
    }

    #[test]
    fn test_ffi_sync_and_last_sync() {
        let dir = tempfile::tempdir().unwrap();
        let state = CString::new(dir.path().join("last_sync.json").to_str().unwrap()).unwrap();
        let records = sample_records();
        let now = CString::new("2024-01-15T12:00:00Z").unwrap();

        unsafe {
            let before = take(vitals_last_sync_json(state.as_ptr()));
            assert_eq!(before, "null");

            let snapshot = vitals_sync_json(
                records.as_ptr(),
                ptr::null(),
                ptr::null(),
                now.as_ptr(),
                state.as_ptr(),
            );
            take(snapshot);

            let summary: serde_json::Value =
                serde_json::from_str(&take(vitals_last_sync_json(state.as_ptr()))).unwrap();
            assert_eq!(summary["steps"], 4000);
            assert_eq!(summary["data_sources"].as_array().unwrap().len(), 2);
        }
    }

    #[test]
    fn test_ffi_classify_source() {
        let samsung = CString::new("com.sec.android.app.shealth").unwrap();
        let fit = CString::new("com.google.android.apps.fitness").unwrap();
        let other = CString::new("com.example.tracker").unwrap();

        unsafe {
            assert_eq!(take(vitals_classify_source(samsung.as_ptr())), "primary");
            assert_eq!(take(vitals_classify_source(fit.as_ptr())), "secondary");
            assert_eq!(take(vitals_classify_source(other.as_ptr())), "other");
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let invalid = CString::new("not json").unwrap();

        unsafe {
            let result = vitals_snapshot_json(invalid.as_ptr(), ptr::null(), ptr::null(), ptr::null());
            assert!(result.is_null());

            let error = vitals_last_error();
            assert!(!error.is_null());
            assert!(CStr::from_ptr(error).to_str().unwrap().contains("line 1"));
        }
    }

    #[test]
    fn test_ffi_invalid_timezone() {
        let records = sample_records();
        let tz = CString::new("Mars/Olympus").unwrap();

        unsafe {
            let result = vitals_snapshot_json(records.as_ptr(), ptr::null(), tz.as_ptr(), ptr::null());
            assert!(result.is_null());
            let error = CStr::from_ptr(vitals_last_error()).to_str().unwrap();
            assert!(error.contains("Mars/Olympus"));
        }
    }

    #[test]
    fn test_ffi_null_records() {
        unsafe {
            let result = vitals_snapshot_json(ptr::null(), ptr::null(), ptr::null(), ptr::null());
            assert!(result.is_null());
            assert!(!vitals_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = vitals_version();
            assert!(!version.is_null());
            assert!(!CStr::from_ptr(version).to_str().unwrap().is_empty());
        }
    }
}
