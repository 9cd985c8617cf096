//! User-installed signal handlers
//!
//! Signals are blocked on every pool worker; only the main thread receives
//! them. Delivery is two-phase: the OS-level hook (async-signal-safe) just
//! sets flags; the interpreter drains pending signals at statement and
//! loop-iteration boundaries on the main flow and evaluates each handler
//! against a fresh transient context. Handler exceptions are reported and
//! swallowed — they never propagate into the interrupted program.

use crate::value::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cheap has-anything-fired check, set from the signal hook.
static ANY_PENDING: AtomicBool = AtomicBool::new(false);

struct Entry {
    handler: Value,
    fired: Arc<AtomicBool>,
    #[cfg(unix)]
    hook: signal_hook::SigId,
}

/// Process-global table of installed handlers, one per signal number.
#[derive(Default)]
pub struct SignalTable {
    entries: Mutex<HashMap<i32, Entry>>,
}

impl SignalTable {
    pub fn new() -> SignalTable {
        SignalTable::default()
    }

    /// Install (or replace) the handler for `signum`.
    #[cfg(unix)]
    pub fn install(&self, signum: i32, handler: Value) -> Result<(), String> {
        let mut entries = self.entries.lock().expect("signal table lock poisoned");
        if let Some(old) = entries.remove(&signum) {
            signal_hook::low_level::unregister(old.hook);
        }
        let fired = Arc::new(AtomicBool::new(false));
        let fired_hook = Arc::clone(&fired);
        // Safety: the hook only touches atomics, which is async-signal-safe.
        let hook = unsafe {
            signal_hook::low_level::register(signum, move || {
                fired_hook.store(true, Ordering::SeqCst);
                ANY_PENDING.store(true, Ordering::SeqCst);
            })
        }
        .map_err(|e| format!("cannot install handler for signal {signum}: {e}"))?;
        entries.insert(
            signum,
            Entry {
                handler,
                fired,
                hook,
            },
        );
        tracing::debug!(signal = signum, "signal handler installed");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install(&self, _signum: i32, _handler: Value) -> Result<(), String> {
        Err(String::from("signal handlers are not supported here"))
    }

    /// Remove a handler. True when one was installed.
    pub fn uninstall(&self, signum: i32) -> bool {
        let mut entries = self.entries.lock().expect("signal table lock poisoned");
        match entries.remove(&signum) {
            Some(_old) => {
                #[cfg(unix)]
                signal_hook::low_level::unregister(_old.hook);
                true
            }
            None => false,
        }
    }

    /// Drain fired signals, returning each signal number with its handler
    /// value. Fast-exits without locking when nothing fired.
    pub fn take_pending(&self) -> Vec<(i32, Value)> {
        if !ANY_PENDING.swap(false, Ordering::SeqCst) {
            return Vec::new();
        }
        let entries = self.entries.lock().expect("signal table lock poisoned");
        entries
            .iter()
            .filter(|(_, e)| e.fired.swap(false, Ordering::SeqCst))
            .map(|(&signum, e)| (signum, e.handler.clone()))
            .collect()
    }

    pub fn installed_count(&self) -> usize {
        self.entries.lock().expect("signal table lock poisoned").len()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial(signals)]
    fn test_install_fire_drain() {
        let table = SignalTable::new();
        table
            .install(signal_hook::consts::SIGUSR1, Value::str("handler"))
            .unwrap();
        assert_eq!(table.installed_count(), 1);
        assert!(table.take_pending().is_empty());

        // Raise the signal at ourselves; the hook sets the flags.
        signal_hook::low_level::raise(signal_hook::consts::SIGUSR1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let pending = table.take_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, signal_hook::consts::SIGUSR1);
        // Drained: nothing pending until the next delivery.
        assert!(table.take_pending().is_empty());
        assert!(table.uninstall(signal_hook::consts::SIGUSR1));
    }

    #[test]
    #[serial_test::serial(signals)]
    fn test_reinstall_replaces_handler() {
        let table = SignalTable::new();
        table
            .install(signal_hook::consts::SIGUSR2, Value::I32(1))
            .unwrap();
        table
            .install(signal_hook::consts::SIGUSR2, Value::I32(2))
            .unwrap();
        assert_eq!(table.installed_count(), 1);
        signal_hook::low_level::raise(signal_hook::consts::SIGUSR2).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let pending = table.take_pending();
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0].1, Value::I32(2)));
        table.uninstall(signal_hook::consts::SIGUSR2);
    }
}
