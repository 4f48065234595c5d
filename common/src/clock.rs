//! Wall-clock source

use crate::types::BlockTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> BlockTime;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> BlockTime {
        let millis = chrono::Utc::now().timestamp_millis();
        BlockTime::from_millis(u64::try_from(millis).unwrap_or(0))
    }
}
