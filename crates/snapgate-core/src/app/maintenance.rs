//! Maintenance - バックグラウンドの保守ループをまとめて起動・停止
//!
//! - GcLoop: キャッシュとレート制限ウィンドウの掃除
//! - ReaperLoop: 古い終端ジョブの回収
//! - shutdown は watch チャネルで全ループに通知

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::builder::App;
use super::gc_loop::GcLoop;
use super::reaper_loop::ReaperLoop;

/// Background maintenance handle.
/// - `request_shutdown()` で両ループに停止を通知
/// - `shutdown_and_join()` で終了まで待つ
pub struct Maintenance {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl Maintenance {
    /// Spawn the cache/limiter GC loop and the job reaper.
    pub fn spawn(app: &App) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let gc = GcLoop::new(
            app.cache.clone(),
            app.limiter.clone(),
            app.config.cache.sweep_interval(),
        );
        let reaper = ReaperLoop::new(
            app.jobs.clone(),
            app.config.jobs.retention(),
            app.config.jobs.reap_interval(),
        );

        let joins = vec![
            tokio::spawn(gc.run(shutdown_rx.clone())),
            tokio::spawn(reaper.run(shutdown_rx)),
        ];
        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}
