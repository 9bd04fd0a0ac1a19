//! Concurrency-model backends.
//!
//! One reference implementation per model, all satisfying the runner
//! contract in [`crate::runner`]:
//! - `selector`: single-threaded multiplexed I/O (mio poll loop)
//! - `tasks`: cooperative tasks (tokio current-thread runtime)
//! - `threads`: one OS thread per connection
//! - `green`: one may coroutine per connection
//! - `cpp_*`: native entry points loaded from a shared library

mod green;
mod native;
mod selector;
mod tasks;
mod threads;

pub use green::GreenBackend;
pub use native::{NativeBackend, NATIVE_TESTS};
pub use selector::SelectorBackend;
pub use tasks::TasksBackend;
pub use threads::ThreadsBackend;

use crate::runner::Registry;
use std::path::Path;

/// Build the registry of built-in backends.
///
/// Registration is an explicit call at startup; the returned map is the
/// single owned source of valid backend names.
pub fn builtin() -> Registry {
    let mut registry = Registry::new();
    registry.insert("selector", Box::new(SelectorBackend) as _);
    registry.insert("tasks", Box::new(TasksBackend) as _);
    registry.insert("threads", Box::new(ThreadsBackend) as _);
    registry.insert("green", Box::new(GreenBackend) as _);
    registry
}

/// Register the native entry points of a shared library.
pub fn register_native(registry: &mut Registry, library: &Path) {
    for &(name, symbol) in NATIVE_TESTS {
        registry.insert(name, Box::new(NativeBackend::new(name, symbol, library)) as _);
    }
}
