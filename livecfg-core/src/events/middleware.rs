//! Listener wrappers composed at subscription time
//!
//! ```ignore
//! bus.subscribe(
//!     CONFIG_CHANGED,
//!     timed("overlay", Duration::from_millis(20), filtered(is_ui_change, on_change)),
//!     0,
//! );
//! ```

use std::time::{Duration, Instant};

use tracing::{trace, warn};

use livecfg_utils::Result;

use super::event::Event;

/// Log a warning when `callback` takes longer than `threshold`
pub fn timed<F>(
    label: impl Into<String>,
    threshold: Duration,
    callback: F,
) -> impl Fn(&Event) -> Result<()> + Send + Sync + 'static
where
    F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
{
    let label = label.into();
    move |event| {
        let started = Instant::now();
        let result = callback(event);
        let elapsed = started.elapsed();
        if elapsed > threshold {
            warn!(
                listener = %label,
                event = %event.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow event listener"
            );
        } else {
            trace!(listener = %label, event = %event.name, elapsed_us = elapsed.as_micros() as u64, "Listener done");
        }
        result
    }
}

/// Only invoke `callback` for events matching `predicate`
pub fn filtered<P, F>(predicate: P, callback: F) -> impl Fn(&Event) -> Result<()> + Send + Sync + 'static
where
    P: Fn(&Event) -> bool + Send + Sync + 'static,
    F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
{
    move |event| {
        if predicate(event) {
            callback(event)
        } else {
            Ok(())
        }
    }
}
