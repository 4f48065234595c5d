//! Clock following tokio time, so paused-time tests control it

use keystone_common::{clock::Clock, BlockTime};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TokioClock {
    start: Instant,
    offset: BlockTime,
}

impl TokioClock {
    /// Clock reading `offset` now
    pub fn starting_at(offset: BlockTime) -> Self {
        Self {
            start: Instant::now(),
            offset,
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> BlockTime {
        self.offset.saturating_add(self.start.elapsed())
    }
}
