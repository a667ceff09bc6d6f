//! Fixed-period background tasks with cancellation

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A spawned loop that runs `tick` every `period`.
///
/// Each tick runs in its own task, so a panicking tick is logged and the
/// schedule carries on. Ticks never overlap: a slow tick delays the next one.
pub struct PeriodicTask {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        initial_delay: Duration,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_name = name.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let run = tokio::spawn(tick());
                let abort = run.abort_handle();
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        abort.abort();
                        break;
                    }
                    joined = run => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                tracing::error!("{} tick panicked: {}", task_name, e);
                            }
                        }
                    }
                }
            }
            tracing::debug!("{} stopped", task_name);
        });

        tracing::debug!("{} scheduled every {:?}", name, period);
        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request the loop to stop without waiting for it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait up to `grace` for the loop. Aborts it past the
    /// deadline and returns `false` in that case.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!("{} did not stop within {:?}, aborting", self.name, grace);
                self.handle.abort();
                false
            }
        }
    }
}
