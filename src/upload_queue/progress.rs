//! Cosmetic progress reporting for uploads whose transport gives no byte counts.

use crate::config::QueueConfig;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSimulator {
    pub tick: Duration,
    pub step: u8,
}

impl ProgressSimulator {
    pub fn new(tick: Duration, step: u8) -> Self {
        Self {
            tick,
            step: step.clamp(1, 100),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.progress_tick(), config.progress_step)
    }

    /// Reports 0, then `step` increments every `tick`, always ending at exactly 100
    pub async fn run(&self, mut report: impl FnMut(u8)) {
        let mut progress = 0u8;
        report(progress);

        while progress < 100 {
            sleep(self.tick).await;
            progress = progress.saturating_add(self.step).min(100);
            report(progress);
        }
    }
}

impl Default for ProgressSimulator {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}
