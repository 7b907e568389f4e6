//! ReaperLoop - 保持期間を過ぎた終端ジョブの回収

use std::time::Duration;

use tokio::sync::watch;

use crate::jobs::JobOrchestrator;

pub struct ReaperLoop {
    jobs: JobOrchestrator,
    retention: chrono::Duration,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(jobs: JobOrchestrator, retention: chrono::Duration, interval: Duration) -> Self {
        Self {
            jobs,
            retention,
            interval,
        }
    }

    pub async fn tick(&self) -> usize {
        self.jobs.reap(self.retention).await
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}
