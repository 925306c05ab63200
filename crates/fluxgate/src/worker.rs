// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background worker lifecycle.
//!
//! Every background loop in the pipeline (periodic reporting, cache
//! eviction, storage writer) is one named thread stopped the same way:
//! dropping the stop sender disconnects the channel the loop ticks on, and
//! the owner waits a bounded time for the exit acknowledgment. A worker
//! that misses the deadline is logged and detached, never retried.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long `stop` waits for a worker to acknowledge before detaching it.
pub(crate) const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to one background worker thread.
pub(crate) struct StopHandle {
    name: &'static str,
    /// Dropping this disconnects the stop channel and unblocks the worker's
    /// `recv_timeout` with `Disconnected`.
    stop_tx: Option<Sender<()>>,
    /// Disconnects when the worker body returns.
    done_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl StopHandle {
    /// Spawn a named worker. The closure receives the stop channel and must
    /// exit promptly once it disconnects.
    pub fn spawn<F>(name: &'static str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(0);
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                body(stop_rx);
                drop(done_tx);
            })?;
        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            done_rx,
            thread: Some(thread),
        })
    }

    /// Signal the worker and wait for it to finish, bounded by `timeout`.
    pub fn stop(&mut self, timeout: Duration) {
        drop(self.stop_tx.take());
        let Some(thread) = self.thread.take() else {
            return;
        };
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "worker {} did not stop within {:?}, detaching",
                    self.name,
                    timeout
                );
            }
        }
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop(STOP_JOIN_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_worker_stops_on_signal() {
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_clone = Arc::clone(&stopped);

        let mut handle = StopHandle::spawn("test-worker", move |stop_rx| {
            loop {
                match stop_rx.recv_timeout(Duration::from_millis(5)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            stopped_clone.store(true, Ordering::Release);
        })
        .expect("spawn");

        let start = Instant::now();
        handle.stop(Duration::from_secs(1));
        assert!(stopped.load(Ordering::Acquire));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_slow_worker_is_detached() {
        let mut handle = StopHandle::spawn("slow-worker", |_stop_rx| {
            std::thread::sleep(Duration::from_millis(200));
        })
        .expect("spawn");

        // Deadline far below the worker's runtime: stop() must come back
        // without joining.
        let start = Instant::now();
        handle.stop(Duration::from_millis(10));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_double_stop_is_noop() {
        let mut handle = StopHandle::spawn("idle-worker", |stop_rx| {
            let _ = stop_rx.recv_timeout(Duration::from_secs(1));
        })
        .expect("spawn");

        handle.stop(Duration::from_secs(1));
        handle.stop(Duration::from_secs(1));
    }
}
