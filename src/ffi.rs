use std::ffi::{c_char, CStr, CString};
use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::docx::repair::fill_docx_file;
use crate::docx::substitute::FieldMap;

static LAST_ERROR: Lazy<Mutex<Option<CString>>> = Lazy::new(|| Mutex::new(None));

fn set_last_error(msg: &str) {
    let c = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    let mut guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(c);
}

fn take_cstr(ptr: *const c_char, name: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{name} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| format!("{name} is not valid UTF-8"))
}

/// Fills a DOCX template with a JSON object of field values.
///
/// Returns 0 on success; non-zero on failure (see `or_last_error_utf8()`).
///
/// # Safety
///
/// Every pointer must be null or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn or_fill_docx(
    input_docx: *const c_char,
    data_json: *const c_char,
    output_docx: *const c_char,
) -> i32 {
    let input = match take_cstr(input_docx, "input_docx") {
        Ok(v) => v,
        Err(e) => {
            set_last_error(&e);
            return 2;
        }
    };
    let data = match take_cstr(data_json, "data_json") {
        Ok(v) => v,
        Err(e) => {
            set_last_error(&e);
            return 3;
        }
    };
    let output = match take_cstr(output_docx, "output_docx") {
        Ok(v) => v,
        Err(e) => {
            set_last_error(&e);
            return 4;
        }
    };

    let data: FieldMap = match serde_json::from_str(&data) {
        Ok(v) => v,
        Err(err) => {
            set_last_error(&format!("data_json must be a JSON object: {err}"));
            return 10;
        }
    };
    match fill_docx_file(&PathBuf::from(input), &PathBuf::from(output), &data) {
        Ok(()) => 0,
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            11
        }
    }
}

/// Returns the last error message as a UTF-8 C string pointer (or null if none).
/// The pointer is valid until the next `or_fill_docx` call.
#[no_mangle]
pub extern "C" fn or_last_error_utf8() -> *const c_char {
    let guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_ref() {
        Some(s) => s.as_ptr(),
        None => std::ptr::null(),
    }
}
