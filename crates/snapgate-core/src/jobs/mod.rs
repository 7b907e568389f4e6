//! Jobs - 非同期ジョブのテーブル、ワーカープール、オーケストレータ

mod orchestrator;
mod pool;
mod store;

pub use self::orchestrator::{JobOrchestrator, WorkResult};
pub use self::pool::{Slot, WorkerPool};
pub use self::store::{JobError, JobStore, JobTable};
