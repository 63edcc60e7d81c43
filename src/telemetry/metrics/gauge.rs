//! Time-boxed execution of observable gauge callbacks.
//!
//! The SDK runs gauge callbacks inline on the collection thread with no
//! budget. Each invocation here runs on a short-lived thread instead; the
//! collection waits at most `budget` for it. A callback that overruns is
//! left to finish on its own, and until it does the next collection skips
//! that gauge rather than piling up threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use opentelemetry::metrics::AsyncInstrument;
use opentelemetry::KeyValue;

use crate::observability::metrics;
use crate::telemetry::error::CallbackError;
use crate::telemetry::metrics::instruments::{GaugeCallback, Number, Observer};

pub(crate) struct TimedCallback<T> {
    name: Arc<str>,
    callback: GaugeCallback<T>,
    budget: Duration,
    running: Arc<AtomicBool>,
}

/// Clears the running flag when the callback thread finishes or unwinds.
struct Release(Arc<AtomicBool>);

impl Drop for Release {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: Number> TimedCallback<T> {
    pub(crate) fn new(name: Arc<str>, callback: GaugeCallback<T>, budget: Duration) -> Self {
        Self {
            name,
            callback,
            budget,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs the callback and forwards its observations to the SDK.
    /// A failed invocation contributes no points to this collection.
    pub(crate) fn observe(&self, instrument: &dyn AsyncInstrument<T>) {
        match self.run() {
            Ok(points) => {
                for (value, attributes) in points {
                    instrument.observe(value, &attributes);
                }
            }
            Err(e) => {
                tracing::warn!(instrument = %self.name, error = %e, "Gauge callback produced no observations");
                metrics::record_callback_failure(&self.name, e.reason());
            }
        }
    }

    pub(crate) fn run(&self) -> Result<Vec<(T, Vec<KeyValue>)>, CallbackError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CallbackError::Overlapping);
        }
        let release = Release(self.running.clone());

        let (tx, rx) = mpsc::sync_channel(1);
        let callback = self.callback.clone();
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("gauge-{}", self.name))
            .spawn(move || {
                let _release = release;
                let mut observer = Observer::new(name);
                let result = callback(&mut observer).map(|()| observer.into_points());
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            // The closure, and the release guard with it, was dropped.
            return Err(CallbackError::failed(format!("could not spawn callback thread: {e}")));
        }

        match rx.recv_timeout(self.budget) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(CallbackError::Timeout(self.budget)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(CallbackError::Panicked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn timed<F>(budget_ms: u64, f: F) -> TimedCallback<f64>
    where
        F: Fn(&mut Observer<f64>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        TimedCallback::new(Arc::from("items_count"), Arc::new(f), Duration::from_millis(budget_ms))
    }

    #[test]
    fn test_observations_are_returned() {
        let gauge = timed(500, |obs| {
            obs.observe(3.0, &[KeyValue::new("store", "memory")]);
            Ok(())
        });
        let points = gauge.run().unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].0, 3.0);
    }

    #[test]
    fn test_slow_callback_times_out_within_budget() {
        let gauge = timed(50, |obs| {
            thread::sleep(Duration::from_millis(400));
            obs.observe(1.0, &[]);
            Ok(())
        });
        let started = Instant::now();
        assert!(matches!(gauge.run(), Err(CallbackError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_millis(300));

        // Still running: the next collection skips it.
        assert!(matches!(gauge.run(), Err(CallbackError::Overlapping)));

        thread::sleep(Duration::from_millis(500));
        assert!(matches!(gauge.run(), Err(CallbackError::Timeout(_))));
    }

    #[test]
    fn test_failure_and_panic_yield_no_points() {
        let failing = timed(500, |obs| {
            obs.observe(1.0, &[]);
            Err(CallbackError::failed("store unavailable"))
        });
        assert!(matches!(failing.run(), Err(CallbackError::Failed(_))));

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let panicking = timed(500, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            panic!("callback bug");
        });
        assert!(matches!(panicking.run(), Err(CallbackError::Panicked)));
        // The claim is released by the unwinding thread.
        assert!(matches!(panicking.run(), Err(CallbackError::Panicked)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
