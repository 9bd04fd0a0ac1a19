//! Native-code backends.
//!
//! Backends implemented outside the managed runtime live in a shared
//! library and expose one entry point each:
//!
//! ```c
//! int run_test_xxx(const char *ip, int port, int count, int msize,
//!                  int backlog, void (*ready)(void),
//!                  void (*before)(void), void (*after)(void));
//! ```
//!
//! The entry point is an opaque collaborator under the same runner
//! contract as every managed backend; it receives the backlog so the
//! sizing heuristic applies identically. The three callbacks are C
//! function pointers, so the round's hooks are parked in a process-wide
//! slot for the duration of the call and the trampolines forward into it.

use crate::backlog::listen_backlog;
use crate::config::TestParams;
use crate::runner::{Backend, BackendError, TestHooks};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error};

/// Registered native backends: registry name and entry-point symbol.
pub const NATIVE_TESTS: &[(&str, &str)] = &[
    ("cpp_epoll", "run_test_epoll"),
    ("cpp_poll", "run_test_poll"),
    ("cpp_th", "run_test_th"),
];

type TimeCb = extern "C" fn();

type NativeEntry = unsafe extern "C" fn(
    *const c_char,
    c_int,
    c_int,
    c_int,
    c_int,
    TimeCb,
    TimeCb,
    TimeCb,
) -> c_int;

/// Hooks installed for the currently running native entry point.
///
/// The pointer is only dereferenced by the trampolines below, and only
/// between `HookGuard` installation and drop, while the borrow it was
/// made from is alive on the calling stack. One round runs at a time, so
/// a plain slot is enough.
struct HookSlot(*mut (dyn TestHooks + 'static));

// The trampolines serialize all access through the mutex.
unsafe impl Send for HookSlot {}

static ACTIVE_HOOKS: Mutex<Option<HookSlot>> = Mutex::new(None);

fn with_hooks(f: impl FnOnce(&mut dyn TestHooks)) {
    let guard = ACTIVE_HOOKS.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_ref() {
        Some(slot) => unsafe { f(&mut *slot.0) },
        None => error!("native callback fired outside a round"),
    }
}

extern "C" fn ready_trampoline() {
    with_hooks(|hooks| hooks.ready_to_connect());
}

extern "C" fn before_trampoline() {
    with_hooks(|hooks| hooks.before_test());
}

extern "C" fn after_trampoline() {
    with_hooks(|hooks| hooks.after_test());
}

/// Clears the hook slot even if the native call errors out.
struct HookGuard;

impl HookGuard {
    fn install(hooks: &mut dyn TestHooks) -> Self {
        let ptr: *mut dyn TestHooks = hooks;
        // Erase the borrow lifetime; the guard on the calling stack keeps
        // the slot cleared before the borrow ends.
        let ptr: *mut (dyn TestHooks + 'static) = unsafe { std::mem::transmute(ptr) };
        *ACTIVE_HOOKS.lock().unwrap_or_else(|e| e.into_inner()) = Some(HookSlot(ptr));
        Self
    }
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        *ACTIVE_HOOKS.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

fn dlerror_string() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dlopen error".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

/// One entry point in a native shared library.
pub struct NativeBackend {
    name: &'static str,
    symbol: &'static str,
    library: PathBuf,
}

impl NativeBackend {
    pub fn new(name: &'static str, symbol: &'static str, library: &Path) -> Self {
        Self {
            name,
            symbol,
            library: library.to_path_buf(),
        }
    }

    fn resolve_entry(&self) -> Result<(*mut c_void, NativeEntry), BackendError> {
        let path = CString::new(self.library.to_string_lossy().as_bytes())
            .map_err(|_| BackendError::Library("library path contains NUL".to_string()))?;

        let handle = unsafe { libc::dlopen(path.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(BackendError::Library(dlerror_string()));
        }

        let symbol = CString::new(self.symbol)
            .map_err(|_| BackendError::Library("symbol contains NUL".to_string()))?;
        let entry = unsafe { libc::dlsym(handle, symbol.as_ptr()) };
        if entry.is_null() {
            let err = dlerror_string();
            unsafe { libc::dlclose(handle) };
            return Err(BackendError::Library(err));
        }

        let entry: NativeEntry = unsafe { std::mem::transmute(entry) };
        Ok((handle, entry))
    }
}

impl Backend for NativeBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self, params: &TestParams, hooks: &mut dyn TestHooks) -> Result<(), BackendError> {
        let (handle, entry) = self.resolve_entry()?;

        let ip = CString::new(params.bind_addr.ip().to_string())
            .map_err(|_| BackendError::Library("bind address contains NUL".to_string()))?;

        debug!(
            library = %self.library.display(),
            symbol = self.symbol,
            "invoking native backend"
        );

        let status = {
            let _guard = HookGuard::install(hooks);
            unsafe {
                entry(
                    ip.as_ptr(),
                    params.bind_addr.port() as c_int,
                    params.count as c_int,
                    params.msize as c_int,
                    listen_backlog(params.count) as c_int,
                    ready_trampoline,
                    before_trampoline,
                    after_trampoline,
                )
            }
        };

        unsafe { libc::dlclose(handle) };

        if status != 0 {
            return Err(BackendError::Native {
                symbol: self.symbol,
                status,
            });
        }
        Ok(())
    }
}
