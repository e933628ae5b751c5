/// Engine clock
///
/// Commands take their "now" from here. Tests pin the time with `set_current_time` to
/// make timers due without waiting.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct EngineClock {
    fixed: ArcSwapOption<DateTime<Utc>>,
}

impl EngineClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self.fixed.load_full() {
            Some(fixed) => *fixed,
            None => Utc::now(),
        }
    }

    pub fn set_current_time(&self, time: DateTime<Utc>) {
        tracing::debug!("🕐 Clock pinned to {}", time);
        self.fixed.store(Some(Arc::new(time)));
    }

    pub fn reset(&self) {
        self.fixed.store(None);
    }
}
