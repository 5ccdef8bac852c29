use crate::application::engine::RegistrationEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodically expires unpaid orders so their capacity returns to the pool.
pub struct ExpirySweeper;

impl ExpirySweeper {
    /// Spawns with the engine's configured `sweep_interval_secs`.
    pub fn start(engine: Arc<RegistrationEngine>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = engine.config().sweep_interval();
        Self::spawn(engine, interval, shutdown)
    }

    /// Runs `sweep_expired` every `interval` until `shutdown` flips to `true`
    /// or its sender is dropped.
    pub fn spawn(
        engine: Arc<RegistrationEngine>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine.sweep_expired().await {
                            tracing::error!(error = %e, "expiry sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("expiry sweeper stopped");
        })
    }
}
