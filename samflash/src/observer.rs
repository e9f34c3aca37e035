//! Status and progress reporting from the core to the caller.

/// Receives status lines and progress events.
///
/// Callbacks are invoked synchronously from the flashing thread and must not
/// block.
pub trait Observer {
    /// A human-readable status line.
    fn on_status(&mut self, message: &str);

    /// Cumulative progress of the current operation.
    ///
    /// `current` never decreases within one operation, and the final event
    /// has `current == total`.
    fn on_progress(&mut self, current: u32, total: u32);
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_status(&mut self, _message: &str) {}

    fn on_progress(&mut self, _current: u32, _total: u32) {}
}

/// Observer that forwards status lines to the `log` facade and drops progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_status(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn on_progress(&mut self, current: u32, total: u32) {
        log::trace!("Progress {current}/{total}");
    }
}
