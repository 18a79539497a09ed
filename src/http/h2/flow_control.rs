//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 9113 Section 5.2.
//!
//! Outbound credit is tracked by [`FlowControlWindow`], a blocking counter
//! shared between writer threads and the reader thread that applies
//! WINDOW_UPDATE and SETTINGS. Inbound credit is tracked by
//! [`ReceiveWindow`], owned by a single consumer.

use super::MAX_WINDOW_SIZE;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Blocking send window
///
/// The counter is signed: a SETTINGS-driven shrink may leave it negative,
/// in which case acquisitions block until enough credit is released.
#[derive(Debug)]
pub struct FlowControlWindow {
    available: Mutex<i64>,
    credit: Condvar,
}

impl FlowControlWindow {
    /// Create a window holding `initial_size` bytes of credit
    pub fn new(initial_size: u32) -> Self {
        FlowControlWindow {
            available: Mutex::new(i64::from(initial_size)),
            credit: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, i64> {
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current credit; may be negative
    pub fn available(&self) -> i64 {
        *self.lock()
    }

    /// Wait up to `timeout` for `amount` bytes of credit and take them
    ///
    /// Returns `false` without touching the counter if the timeout elapses.
    /// A zero timeout only succeeds when the credit is already there.
    pub fn try_acquire(&self, amount: u32, timeout: Duration) -> bool {
        let amount = i64::from(amount);
        let deadline = Instant::now().checked_add(timeout);
        let mut available = self.lock();
        while *available < amount {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                return false;
            }
            let (guard, _) = self
                .credit
                .wait_timeout(available, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            available = guard;
        }
        *available -= amount;
        true
    }

    /// Add credit and wake blocked writers
    pub fn release(&self, amount: u32) {
        let mut available = self.lock();
        *available += i64::from(amount);
        self.credit.notify_all();
    }

    /// Add credit unless the result would exceed 2^31-1
    ///
    /// Returns the new credit, or `None` if the increment was rejected.
    pub fn release_checked(&self, amount: u32) -> Option<i64> {
        let mut available = self.lock();
        let updated = *available + i64::from(amount);
        if updated > i64::from(MAX_WINDOW_SIZE) {
            return None;
        }
        *available = updated;
        self.credit.notify_all();
        Some(updated)
    }

    /// Shift the window by `delta` after an INITIAL_WINDOW_SIZE change
    pub fn adjust(&self, delta: i64) {
        let mut available = self.lock();
        *available += delta;
        if *available > 0 {
            self.credit.notify_all();
        }
    }
}

/// Inbound window for one connection or stream
///
/// Tracks how much the peer may still send. Bytes are charged when a DATA
/// frame arrives and credited back once consumed; the credit is batched
/// into a WINDOW_UPDATE only after the window has dropped below half of its
/// initial size.
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    initial_size: i64,
    available: i64,
    pending: i64,
}

impl ReceiveWindow {
    /// Create a receive window of `initial_size` bytes
    pub fn new(initial_size: u32) -> Self {
        ReceiveWindow {
            initial_size: i64::from(initial_size),
            available: i64::from(initial_size),
            pending: 0,
        }
    }

    /// Remaining inbound credit as last advertised to the peer
    pub fn available(&self) -> i64 {
        self.available
    }

    /// Initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size as u32
    }

    /// Account for `len` received bytes
    ///
    /// Returns `false` if the peer sent more than the window allowed.
    pub fn consume(&mut self, len: u32) -> bool {
        self.available -= i64::from(len);
        self.available >= 0
    }

    /// Credit back `len` consumed bytes
    ///
    /// Returns the increment to advertise once the window is below half its
    /// initial size; otherwise the credit is held for a later update.
    pub fn release(&mut self, len: u32) -> Option<u32> {
        self.pending += i64::from(len);
        if self.pending == 0 || self.available >= self.initial_size / 2 {
            return None;
        }
        let increment = self.pending;
        self.available += increment;
        self.pending = 0;
        u32::try_from(increment).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_window_acquire_timeout_then_release() {
        let window = FlowControlWindow::new(1000);

        assert!(!window.try_acquire(1200, Duration::from_millis(50)));
        assert_eq!(window.available(), 1000);

        window.release(300);
        assert_eq!(window.available(), 1300);

        assert!(window.try_acquire(1200, Duration::from_millis(50)));
        assert_eq!(window.available(), 100);
    }

    #[test]
    fn test_window_zero_timeout() {
        let window = FlowControlWindow::new(10);
        assert!(window.try_acquire(10, Duration::ZERO));
        assert!(!window.try_acquire(1, Duration::ZERO));
        assert_eq!(window.available(), 0);
    }

    #[test]
    fn test_window_negative_after_adjust() {
        let window = FlowControlWindow::new(100);
        assert!(window.try_acquire(80, Duration::ZERO));
        window.adjust(-50);
        assert_eq!(window.available(), -30);
        assert!(!window.try_acquire(1, Duration::from_millis(10)));

        window.release(40);
        assert_eq!(window.available(), 10);
        assert!(window.try_acquire(10, Duration::ZERO));
    }

    #[test]
    fn test_window_release_checked_overflow() {
        let window = FlowControlWindow::new(0x7FFF_FFFF);
        assert_eq!(window.release_checked(1), None);
        assert_eq!(window.available(), 0x7FFF_FFFF);

        let window = FlowControlWindow::new(10);
        assert_eq!(window.release_checked(5), Some(15));
    }

    #[test]
    fn test_window_wakes_blocked_writer() {
        let window = Arc::new(FlowControlWindow::new(0));
        let waiter = {
            let window = Arc::clone(&window);
            thread::spawn(move || window.try_acquire(500, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        window.release(200);
        window.release(300);
        assert!(waiter.join().unwrap());
        assert_eq!(window.available(), 0);
    }

    #[test]
    fn test_receive_window_update_threshold() {
        let mut window = ReceiveWindow::new(100);
        assert!(window.consume(40));
        assert_eq!(window.release(40), None);

        assert!(window.consume(20));
        assert_eq!(window.release(20), Some(60));
        assert_eq!(window.available(), 100);
    }

    #[test]
    fn test_receive_window_credits_only_consumed_bytes() {
        let mut window = ReceiveWindow::new(100);
        assert!(window.consume(80));
        assert_eq!(window.release(10), Some(10));
        assert_eq!(window.available(), 30);
        assert_eq!(window.release(0), None);
    }

    #[test]
    fn test_receive_window_overrun() {
        let mut window = ReceiveWindow::new(10);
        assert!(!window.consume(11));
    }
}
