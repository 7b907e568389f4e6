//! WorkerPool - 同時実行ジョブ数の上限
//!
//! - `try_reserve()` で枠を確保（満杯なら None、待たない）
//! - `spawn()` は確保済みの枠を握ったままタスクを走らせ、終了時に解放
//! - `drain()` は実行中のジョブが全て終わるまで待ち、以後の確保を拒否

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// A reserved execution slot. Dropping it gives the slot back.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve a slot without waiting.
    pub fn try_reserve(&self) -> Option<Slot> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Slot { _permit: permit })
    }

    /// Run `fut` on its own task, holding `slot` until it finishes.
    pub fn spawn<F>(&self, slot: Slot, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let _slot = slot;
            fut.await;
        })
    }

    /// Jobs currently holding a slot.
    pub fn in_flight(&self) -> usize {
        if self.semaphore.is_closed() {
            return 0;
        }
        self.capacity.saturating_sub(self.semaphore.available_permits())
    }

    /// Wait for every in-flight job, then refuse further reservations.
    pub async fn drain(&self) {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        if let Ok(permits) = self.semaphore.acquire_many(all).await {
            self.semaphore.close();
            drop(permits);
        }
    }
}
