//! Panic-hook plumbing shared by every binary.
//!
//! The full subscriber (with the optional OTLP layer) is built by
//! `tracing-utils`; this module only owns the part that has nothing to do
//! with exporters: turning a panic into a structured `tracing::error!`
//! event instead of a raw stderr dump, so it ends up in the same log
//! stream as everything else.

use std::panic;

/// Guard returned by [`replace_panic_hook_with_tracing_panic_hook`]. Dropping
/// it restores the previous panic hook; tests use this to avoid leaking
/// hooks across cases run in the same process.
pub struct PanicHookGuard {
    restored: bool,
}

impl PanicHookGuard {
    /// Explicitly restore the default hook instead of doing it on drop.
    pub fn forget(mut self) {
        self.restored = true;
    }
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        if !self.restored {
            let _ = panic::take_hook();
        }
    }
}

/// Installs a panic hook that logs via `tracing::error!` with the panic
/// location and payload, then chains to the previous hook so process
/// supervisors that scrape stderr directly still see something.
pub fn replace_panic_hook_with_tracing_panic_hook() -> PanicHookGuard {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
        let message = panic_message(info);
        tracing::error!(location = location.as_deref(), "panic: {message}");
        previous(info);
    }));
    PanicHookGuard { restored: false }
}

fn panic_message(info: &panic::PanicInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_default_hook_on_drop() {
        let guard = replace_panic_hook_with_tracing_panic_hook();
        drop(guard);
        // No assertion beyond "doesn't panic": there is no public API to
        // read back the installed hook, only to observe its side effects.
    }
}
