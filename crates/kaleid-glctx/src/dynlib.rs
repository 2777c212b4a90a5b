//! Dynamic-library access for the GL resolver.
//!
//! Opened libraries are intentionally never closed by default: unloading a
//! GL driver stack during process teardown is a well-known crash source, so
//! release is left to the OS at process exit.

use std::ffi::c_void;

use thiserror::Error;

use kaleid_core::EngineError;

#[derive(Debug, Error)]
pub enum DynLibError {
    #[error("none of the candidate libraries could be opened: {tried:?} ({detail})")]
    OpenFailed { tried: Vec<String>, detail: String },

    #[error("dynamic libraries are not available on this platform")]
    Unsupported,
}

impl From<DynLibError> for EngineError {
    fn from(err: DynLibError) -> Self {
        EngineError::GlContext(err.to_string())
    }
}

/// Converts an untyped procedure address into a typed function pointer.
///
/// `dlsym`/`GetProcAddress` hand back untyped addresses; a direct pointer
/// cast between object and function pointers is not portable, so the bit
/// pattern is copied byte-wise instead. Fails closed when the target type's
/// size does not match a data pointer (exotic ABIs).
///
/// # Safety
///
/// `F` must be a function pointer type whose ABI matches the symbol.
pub unsafe fn symbol_to_function<F: Copy>(symbol: *mut c_void) -> Option<F> {
    if symbol.is_null() {
        return None;
    }
    if std::mem::size_of::<F>() != std::mem::size_of::<*mut c_void>() {
        return None;
    }
    Some(std::mem::transmute_copy::<*mut c_void, F>(&symbol))
}

/// Converts a function pointer into its integer representation, for sentinel
/// validation. Returns 0 when the conversion is not representable.
pub fn function_to_integer<F: Copy>(func: F) -> usize {
    if std::mem::size_of::<F>() != std::mem::size_of::<usize>() {
        return 0;
    }
    // Same byte-copy discipline as symbol_to_function.
    unsafe { std::mem::transmute_copy::<F, usize>(&func) }
}

/// Wrapper around one opened platform library.
#[derive(Debug)]
pub struct DynamicLibrary {
    handle: imp::Handle,
    loaded_name: String,
    close_on_drop: bool,
}

// The handle refers to a process-global library that is never unloaded while
// the resolver snapshot is alive.
unsafe impl Send for DynamicLibrary {}
unsafe impl Sync for DynamicLibrary {}

impl DynamicLibrary {
    /// Attempts to open the first library from the candidate list, in order.
    pub fn open(names: &[&str]) -> Result<DynamicLibrary, DynLibError> {
        let mut detail = String::new();
        for name in names {
            match imp::open(name) {
                Ok(handle) => {
                    return Ok(DynamicLibrary {
                        handle,
                        loaded_name: name.to_string(),
                        close_on_drop: false,
                    })
                }
                Err(e) => {
                    if !detail.is_empty() {
                        detail.push_str("; ");
                    }
                    detail.push_str(&format!("{name}: {e}"));
                }
            }
        }
        Err(DynLibError::OpenFailed {
            tried: names.iter().map(|n| n.to_string()).collect(),
            detail,
        })
    }

    /// Name of the candidate that was successfully opened.
    pub fn loaded_name(&self) -> &str {
        &self.loaded_name
    }

    /// Resolves an exported symbol from this library.
    pub fn symbol(&self, name: &str) -> *mut c_void {
        imp::symbol(self.handle, name)
    }

    /// Looks a symbol up in the process-wide global scope.
    pub fn find_global_symbol(name: &str) -> *mut c_void {
        imp::find_global_symbol(name)
    }

    /// Enables closing the library on drop. Off by default; only for
    /// short-lived helper loads where unloading is safe and desired.
    pub fn set_close_on_drop(&mut self, enabled: bool) {
        self.close_on_drop = enabled;
    }
}

impl Drop for DynamicLibrary {
    fn drop(&mut self) {
        if self.close_on_drop {
            imp::close(self.handle);
        }
    }
}

// -------------------------------------------------------------------------
// POSIX (Linux, macOS, Android, BSDs)
// -------------------------------------------------------------------------
#[cfg(all(unix, not(target_os = "emscripten")))]
mod imp {
    use std::ffi::{c_void, CStr, CString};

    pub type Handle = *mut c_void;

    pub fn open(name: &str) -> Result<Handle, String> {
        let cname = CString::new(name).map_err(|_| "name contains NUL".to_string())?;
        // RTLD_GLOBAL so core entry points also become visible to the
        // process-scope lookup step of the resolver chain.
        let handle = unsafe { libc::dlopen(cname.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
        if handle.is_null() {
            return Err(last_error());
        }
        Ok(handle)
    }

    pub fn close(handle: Handle) {
        if !handle.is_null() {
            unsafe {
                libc::dlclose(handle);
            }
        }
    }

    pub fn symbol(handle: Handle, name: &str) -> *mut c_void {
        let Ok(cname) = CString::new(name) else {
            return std::ptr::null_mut();
        };
        unsafe { libc::dlsym(handle, cname.as_ptr()) }
    }

    pub fn find_global_symbol(name: &str) -> *mut c_void {
        let Ok(cname) = CString::new(name) else {
            return std::ptr::null_mut();
        };
        unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) }
    }

    fn last_error() -> String {
        let err = unsafe { libc::dlerror() };
        if err.is_null() {
            return "unknown dlopen error".to_string();
        }
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

// -------------------------------------------------------------------------
// Windows
// -------------------------------------------------------------------------
#[cfg(windows)]
mod imp {
    use std::ffi::c_void;

    use windows::core::{PCSTR, PCWSTR};
    use windows::Win32::Foundation::{HANDLE, HMODULE};
    use windows::Win32::System::LibraryLoader::{
        LoadLibraryExW, LOAD_LIBRARY_SEARCH_APPLICATION_DIR, LOAD_LIBRARY_SEARCH_SYSTEM32,
    };
    use windows::Win32::System::ProcessStatus::EnumProcessModules;
    use windows::Win32::System::Threading::GetCurrentProcess;

    pub type Handle = HMODULE;

    /// DLLs that must never be picked up from the application directory.
    const SYSTEM_ONLY: &[&str] = &["opengl32.dll"];

    pub fn open(name: &str) -> Result<Handle, String> {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

        let mut flags = LOAD_LIBRARY_SEARCH_APPLICATION_DIR | LOAD_LIBRARY_SEARCH_SYSTEM32;
        let lowered = name.to_ascii_lowercase();
        if !cfg!(feature = "unsafe-dll-search") && SYSTEM_ONLY.contains(&lowered.as_str()) {
            flags = LOAD_LIBRARY_SEARCH_SYSTEM32;
        }

        unsafe { LoadLibraryExW(PCWSTR(wide.as_ptr()), HANDLE::default(), flags) }
            .map_err(|e| e.message().to_string())
    }

    pub fn close(handle: Handle) {
        if !handle.is_invalid() {
            unsafe {
                let _ = windows::Win32::System::LibraryLoader::FreeLibrary(handle);
            }
        }
    }

    pub fn symbol(handle: Handle, name: &str) -> *mut c_void {
        let mut bytes = name.as_bytes().to_vec();
        bytes.push(0);
        match unsafe { windows::Win32::System::LibraryLoader::GetProcAddress(handle, PCSTR(bytes.as_ptr())) } {
            Some(proc) => proc as *mut c_void,
            None => std::ptr::null_mut(),
        }
    }

    /// Windows has no RTLD_DEFAULT; enumerate the loaded modules instead.
    pub fn find_global_symbol(name: &str) -> *mut c_void {
        let mut modules = [HMODULE::default(); 256];
        let mut needed = 0u32;
        let ok = unsafe {
            EnumProcessModules(
                GetCurrentProcess(),
                modules.as_mut_ptr(),
                std::mem::size_of_val(&modules) as u32,
                &mut needed,
            )
        };
        if ok.is_err() {
            return std::ptr::null_mut();
        }

        let count =
            (needed as usize / std::mem::size_of::<HMODULE>()).min(modules.len());
        for module in &modules[..count] {
            let ptr = symbol(*module, name);
            if !ptr.is_null() {
                return ptr;
            }
        }
        std::ptr::null_mut()
    }
}

// -------------------------------------------------------------------------
// Emscripten: no dynamic libraries; the resolver uses the WebGL proc-address
// queries instead.
// -------------------------------------------------------------------------
#[cfg(target_os = "emscripten")]
mod imp {
    use std::ffi::c_void;

    pub type Handle = *mut c_void;

    pub fn open(_name: &str) -> Result<Handle, String> {
        Err("no dynamic libraries on this platform".to_string())
    }

    pub fn close(_handle: Handle) {}

    pub fn symbol(_handle: Handle, _name: &str) -> *mut c_void {
        std::ptr::null_mut()
    }

    pub fn find_global_symbol(_name: &str) -> *mut c_void {
        std::ptr::null_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_symbol_converts_to_none() {
        type Fn0 = unsafe extern "C" fn();
        let converted = unsafe { symbol_to_function::<Fn0>(std::ptr::null_mut()) };
        assert!(converted.is_none());
    }

    #[test]
    fn symbol_round_trips_through_function_pointer() {
        unsafe extern "C" fn probe() {}
        type Fn0 = unsafe extern "C" fn();

        let typed: Fn0 = probe;
        let as_symbol = typed as *mut c_void;
        let back = unsafe { symbol_to_function::<Fn0>(as_symbol) }.expect("conversion");
        assert_eq!(function_to_integer(back), as_symbol as usize);
    }

    #[test]
    fn open_failure_lists_all_candidates() {
        let err = DynamicLibrary::open(&["libkaleid-no-such-lib.so.42"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("libkaleid-no-such-lib.so.42"), "{msg}");
    }
}
