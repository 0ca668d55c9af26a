//! Inbound-silence watchdog.

use crate::utils::elapsed_ms;

pub const INBOUND_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug)]
pub struct WatchdogSupervisor {
    last_inbound_ms: u64,
    timeout_ms: u64,
}

impl WatchdogSupervisor {
    /// Start supervising with `now_ms` as the initial baseline.
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_inbound_ms: now_ms,
            timeout_ms: INBOUND_TIMEOUT_MS,
        }
    }

    pub fn record_inbound(&mut self, now_ms: u64) {
        self.last_inbound_ms = now_ms;
    }

    pub fn last_inbound_ms(&self) -> u64 {
        self.last_inbound_ms
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        elapsed_ms(now_ms, self.last_inbound_ms) >= self.timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_exactly_at_timeout() {
        let watchdog = WatchdogSupervisor::new(5_000);
        assert!(!watchdog.is_expired(5_000));
        assert!(!watchdog.is_expired(34_999));
        assert!(watchdog.is_expired(35_000));
        assert!(watchdog.is_expired(90_000));
    }

    #[test]
    fn inbound_traffic_moves_baseline() {
        let mut watchdog = WatchdogSupervisor::new(0);
        watchdog.record_inbound(29_000);
        assert_eq!(watchdog.last_inbound_ms(), 29_000);
        assert!(!watchdog.is_expired(58_999));
        assert!(watchdog.is_expired(59_000));
    }

    #[test]
    fn handles_clock_wraparound() {
        let watchdog = WatchdogSupervisor::new(u64::MAX - 10_000);
        assert!(!watchdog.is_expired(19_998));
        assert!(watchdog.is_expired(19_999));
    }
}
