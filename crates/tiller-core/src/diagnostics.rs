// Tiller Diagnostics
// Observable non-fatal conditions raised by the dispatch loop

use crate::fourcc::FourCC;

/// A non-fatal condition encountered while dispatching events.
///
/// None of these abort the batch; they exist so a host environment can log
/// or assert on them during development without the hook being required in
/// production.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// An event named a device id with no live device behind it. Normal
    /// when devices disconnect mid-batch or are not yet registered.
    DeviceNotFound { device_id: i32, time: f64 },

    /// A state-update event did not match the target device's state block
    /// descriptor; the payload was discarded.
    FormatMismatch {
        device_id: i32,
        expected_format: FourCC,
        actual_format: FourCC,
        expected_size: u32,
        actual_size: u32,
        time: f64,
    },

    /// An event arrived with a timestamp older than the last state already
    /// applied to its device; the event was dropped.
    StaleEvent {
        device_id: i32,
        time: f64,
        last_applied: f64,
    },
}

/// Receiver for [`Diagnostic`] notifications.
pub trait DiagnosticsObserver: Send {
    fn on_diagnostic(&mut self, diagnostic: &Diagnostic);
}

impl<F> DiagnosticsObserver for F
where
    F: FnMut(&Diagnostic) + Send,
{
    fn on_diagnostic(&mut self, diagnostic: &Diagnostic) {
        self(diagnostic)
    }
}

/// Fan-out point owned by the engine.
#[derive(Default)]
pub(crate) struct DiagnosticsHub {
    next_id: u64,
    observers: Vec<(u64, Box<dyn DiagnosticsObserver>)>,
}

impl DiagnosticsHub {
    pub(crate) fn add(&mut self, observer: impl DiagnosticsObserver + 'static) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    pub(crate) fn emit(&mut self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::DeviceNotFound { device_id, time } => {
                log::debug!("event at t={time} targets unknown device {device_id}");
            }
            Diagnostic::FormatMismatch {
                device_id,
                expected_format,
                actual_format,
                expected_size,
                actual_size,
                ..
            } => {
                log::warn!(
                    "dropping state event for device {device_id}: \
                     got {actual_format}/{actual_size} bytes, \
                     device expects {expected_format}/{expected_size}"
                );
            }
            Diagnostic::StaleEvent {
                device_id,
                time,
                last_applied,
            } => {
                log::debug!(
                    "dropping stale event for device {device_id}: \
                     t={time} is older than last applied t={last_applied}"
                );
            }
        }
        for (_, observer) in &mut self.observers {
            observer.on_diagnostic(&diagnostic);
        }
    }
}
