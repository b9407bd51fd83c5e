//! timers.rs
//!
//! Virtual event timers: "fire event E after D milliseconds". Deadlines are advanced by
//! the stimulus tick and expired events are latched into a bit mask that the main loop
//! drains, so the work behind an event always runs in main-loop context.
//!
//! One slot per event; restarting an armed event replaces its deadline.

use crate::config::US_PER_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimerEvent {
    /// Advertising idle timeout elapsed: go to sleep.
    SleepCountdown = 0,
    /// Next edge of the connection indicator blink.
    ConnectionBlink = 1,
    /// Periodic battery sample.
    BatteryCheck = 2,
}

impl TimerEvent {
    pub const ALL: [TimerEvent; 3] = [
        TimerEvent::SleepCountdown,
        TimerEvent::ConnectionBlink,
        TimerEvent::BatteryCheck,
    ];

    const fn mask(self) -> u8 {
        1 << self as u8
    }
}

const SLOTS: usize = TimerEvent::ALL.len();

#[derive(Debug, Default)]
pub struct SoftTimers {
    remaining_us: [Option<u32>; SLOTS],
    expired: u8,
}

impl SoftTimers {
    pub const fn new() -> Self {
        SoftTimers {
            remaining_us: [None; SLOTS],
            expired: 0,
        }
    }

    /// Arm `event` to expire `after_ms` from now. Also clears a latched expiry.
    pub fn start(&mut self, event: TimerEvent, after_ms: u32) {
        self.remaining_us[event as usize] = Some(after_ms.saturating_mul(US_PER_MS));
        self.expired &= !event.mask();
    }

    pub fn cancel(&mut self, event: TimerEvent) {
        self.remaining_us[event as usize] = None;
        self.expired &= !event.mask();
    }

    pub fn is_armed(&self, event: TimerEvent) -> bool {
        self.remaining_us[event as usize].is_some()
    }

    pub fn cancel_all(&mut self) {
        *self = SoftTimers::new();
    }

    /// Advance every armed deadline by `elapsed_us`. Constant time; safe to call from
    /// the tick interrupt.
    pub fn advance(&mut self, elapsed_us: u32) {
        for event in TimerEvent::ALL {
            let slot = &mut self.remaining_us[event as usize];
            if let Some(remaining) = slot {
                if *remaining <= elapsed_us {
                    *slot = None;
                    self.expired |= event.mask();
                } else {
                    *remaining -= elapsed_us;
                }
            }
        }
    }

    /// Drain the expired events.
    pub fn take_expired(&mut self) -> ExpiredEvents {
        let mask = self.expired;
        self.expired = 0;
        ExpiredEvents { mask, next: 0 }
    }
}

/// Iterator over the events drained by `SoftTimers::take_expired`.
pub struct ExpiredEvents {
    mask: u8,
    next: usize,
}

impl ExpiredEvents {
    pub fn is_empty(&self) -> bool {
        self.mask >> self.next == 0
    }
}

impl Iterator for ExpiredEvents {
    type Item = TimerEvent;

    fn next(&mut self) -> Option<TimerEvent> {
        while self.next < SLOTS {
            let event = TimerEvent::ALL[self.next];
            self.next += 1;
            if self.mask & event.mask() != 0 {
                return Some(event);
            }
        }
        None
    }
}
