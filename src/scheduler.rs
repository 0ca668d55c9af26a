//! Periodic actions keyed off a tenths-of-a-second counter since `Ready`.

use crate::utils::elapsed_ms;

pub const TICK_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledAction {
    RequestActiveScan,
    PublishPower,
    PublishLocalSensor,
    Ping,
    ResyncClock,
}

/// `(period, offset, action)`: fires when `counter % period == offset`.
const RULES: [(u64, u64, ScheduledAction); 5] = [
    (600, 0, ScheduledAction::RequestActiveScan),
    (600, 10, ScheduledAction::PublishPower),
    (600, 30, ScheduledAction::PublishLocalSensor),
    (100, 0, ScheduledAction::Ping),
    (9000, 0, ScheduledAction::ResyncClock),
];

/// Actions due at one counter value.
pub fn actions_at(counter: u64) -> Vec<ScheduledAction> {
    RULES
        .iter()
        .filter(|(period, offset, _)| counter % period == *offset)
        .map(|(_, _, action)| *action)
        .collect()
}

/// Edge-triggered tick scheduler
///
/// The counter catches up with elapsed time by at most one tick per poll, so
/// a slow loop delays boundaries but never skips them, and each boundary
/// fires once no matter how often the same value is polled.
#[derive(Debug, Default)]
pub struct TickScheduler {
    ready_ms: Option<u64>,
    counter: u64,
    last_fired: Option<u64>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor the counter at the moment the node became ready.
    pub fn start(&mut self, now_ms: u64) {
        self.ready_ms = Some(now_ms);
        self.counter = 0;
        self.last_fired = None;
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn poll(&mut self, now_ms: u64) -> Vec<ScheduledAction> {
        let Some(ready_ms) = self.ready_ms else {
            return Vec::new();
        };
        let target = elapsed_ms(now_ms, ready_ms) / TICK_MS;
        if self.counter < target {
            self.counter += 1;
        }
        if self.last_fired == Some(self.counter) {
            return Vec::new();
        }
        self.last_fired = Some(self.counter);
        actions_at(self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScheduledAction::*;

    #[test]
    fn rule_table() {
        assert_eq!(actions_at(0), vec![RequestActiveScan, Ping, ResyncClock]);
        assert_eq!(actions_at(10), vec![PublishPower]);
        assert_eq!(actions_at(30), vec![PublishLocalSensor]);
        assert_eq!(actions_at(100), vec![Ping]);
        assert_eq!(actions_at(600), vec![RequestActiveScan, Ping]);
        assert_eq!(actions_at(610), vec![PublishPower]);
        assert_eq!(actions_at(9000), vec![RequestActiveScan, Ping, ResyncClock]);
        assert!(actions_at(1).is_empty());
        assert!(actions_at(599).is_empty());
    }

    #[test]
    fn idle_until_started() {
        let mut scheduler = TickScheduler::new();
        assert!(scheduler.poll(60_000).is_empty());
        assert_eq!(scheduler.counter(), 0);
    }

    #[test]
    fn scan_request_fires_once_per_boundary() {
        let mut scheduler = TickScheduler::new();
        scheduler.start(0);
        let mut fired_at = Vec::new();
        for counter in 0..=1300u64 {
            // Poll each tick several times, jittering within the tick
            for jitter in [0, 0, 40, 99] {
                let actions = scheduler.poll(counter * TICK_MS + jitter);
                if actions.contains(&RequestActiveScan) {
                    fired_at.push(scheduler.counter());
                }
            }
        }
        assert_eq!(fired_at, vec![0, 600, 1200]);
    }

    #[test]
    fn slow_polling_catches_up_without_skipping() {
        let mut scheduler = TickScheduler::new();
        scheduler.start(1_000);
        assert_eq!(scheduler.poll(1_000), actions_at(0));

        // The loop stalled for two seconds: boundaries 1..=20 are replayed
        // one per poll at the same wall time
        let mut power = 0;
        for _ in 0..20 {
            if scheduler.poll(3_000).contains(&PublishPower) {
                power += 1;
            }
        }
        assert_eq!(scheduler.counter(), 20);
        assert_eq!(power, 1);
        assert!(scheduler.poll(3_000).is_empty());
        assert_eq!(scheduler.counter(), 20);
    }

    #[test]
    fn counter_survives_clock_wraparound() {
        let mut scheduler = TickScheduler::new();
        let ready = u64::MAX - 250;
        scheduler.start(ready);
        scheduler.poll(ready);
        scheduler.poll(ready.wrapping_add(100));
        scheduler.poll(ready.wrapping_add(200));
        scheduler.poll(ready.wrapping_add(300)); // wrapped past zero
        assert_eq!(scheduler.counter(), 3);
    }

    #[test]
    fn restart_resets_counter() {
        let mut scheduler = TickScheduler::new();
        scheduler.start(0);
        scheduler.poll(0);
        scheduler.poll(100);
        scheduler.start(5_000);
        assert_eq!(scheduler.poll(5_000), actions_at(0));
    }
}
