//! # Logging Utilities
//!
//! Rate limiting for warnings that can repeat once per payload (an unassigned
//! device on a busy base station would otherwise flood the log) and bounded
//! hex dumps of payloads.
//!
//! ```rust
//! use mioty_payload::util::logging::LogThrottle;
//! use std::time::Duration;
//!
//! let throttle = LogThrottle::new(Duration::from_secs(1), 5);
//! if throttle.allow() {
//!     log::warn!("unknown device");
//! }
//! ```

use crate::constants::MAX_LOGGED_PAYLOAD;
use crate::util::hex::format_hex_spaced;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Allows at most `cap` messages per `window`.
///
/// All state is atomic, so one throttle can be shared by every decoding
/// thread. Counting is approximate only at a window boundary.
#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    cap: u32,
    origin: Instant,
    /// Start of the current window, in milliseconds since `origin`
    window_start: AtomicU64,
    count: AtomicU32,
    /// Messages rejected in the current window
    suppressed: AtomicU32,
}

impl LogThrottle {
    pub fn new(window: Duration, cap: u32) -> Self {
        Self {
            window,
            cap,
            origin: Instant::now(),
            window_start: AtomicU64::new(0),
            count: AtomicU32::new(0),
            suppressed: AtomicU32::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns `true` if the message should be logged.
    pub fn allow(&self) -> bool {
        let now = self.now_ms();
        let start = self.window_start.load(Ordering::Acquire);
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);

        // Only the thread that moves the window forward resets the counters.
        if now.saturating_sub(start) > window_ms
            && self
                .window_start
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.count.store(0, Ordering::Release);
            let dropped = self.suppressed.swap(0, Ordering::AcqRel);
            if dropped > 0 {
                log::warn!(
                    target: "mioty::log",
                    "{} similar messages suppressed in the last {:?}",
                    dropped,
                    self.window
                );
            }
        }

        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_add(1)))
            .unwrap_or(u32::MAX);
        let allowed = previous < self.cap;
        if !allowed {
            self.suppressed.fetch_add(1, Ordering::AcqRel);
        }
        allowed
    }

    pub fn suppressed(&self) -> u32 {
        self.suppressed.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.window_start.store(self.now_ms(), Ordering::Release);
        self.count.store(0, Ordering::Release);
        self.suppressed.store(0, Ordering::Release);
    }
}

/// Log a payload in hex at debug level, truncated to a bounded length.
pub fn log_payload_hex(prefix: &str, data: &[u8]) {
    if !log::log_enabled!(target: "mioty::payload", log::Level::Debug) {
        return;
    }
    let shown = &data[..data.len().min(MAX_LOGGED_PAYLOAD)];
    let suffix = if data.len() > MAX_LOGGED_PAYLOAD {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };
    log::debug!(target: "mioty::payload", "{prefix}: {}{suffix}", format_hex_spaced(shown));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_log_throttle_basic() {
        let throttle = LogThrottle::new(Duration::from_secs(60), 3);

        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(throttle.allow());

        assert!(!throttle.allow());
        assert!(!throttle.allow());
        assert_eq!(throttle.suppressed(), 2);
    }

    #[test]
    fn test_log_throttle_reset() {
        let throttle = LogThrottle::new(Duration::from_secs(60), 1);
        assert!(throttle.allow());
        assert!(!throttle.allow());

        throttle.reset();
        assert!(throttle.allow());
        assert_eq!(throttle.suppressed(), 0);
    }

    #[test]
    fn test_log_throttle_window_expiry() {
        let throttle = LogThrottle::new(Duration::from_millis(10), 1);
        assert!(throttle.allow());
        assert!(!throttle.allow());
        std::thread::sleep(Duration::from_millis(20));
        assert!(throttle.allow());
    }

    #[test]
    fn test_log_throttle_shared_between_threads() {
        let throttle = Arc::new(LogThrottle::new(Duration::from_secs(60), 100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                std::thread::spawn(move || (0..50).filter(|_| throttle.allow()).count())
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
        assert_eq!(throttle.suppressed(), 300);
    }

    #[test]
    fn test_log_payload_hex_handles_long_payloads() {
        log_payload_hex("payload", &[0u8; 200]);
        log_payload_hex("payload", &[]);
    }
}
