//! Background workers wrapping the lifecycle manager, event router, and
//! queue processor in service components. Each owns a plain interval loop
//! with a watch-channel stop signal; the components expose their `tick()`
//! directly so tests drive them without the clock.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::core::agents::{AgentLifecycle, recover_orphans};
use crate::core::queue::QueueProcessor;
use crate::core::router::EventRouter;
use crate::core::service::ServiceComponent;

fn spawn_ticker<F, Fut>(interval: Duration, mut stop: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = timer.tick() => tick().await,
                _ = stop.changed() => break,
            }
        }
    });
}

/// Flushes agent log buffers every second and runs the startup recovery
/// sweep without blocking the rest of boot.
pub struct LifecycleWorker {
    lifecycle: Arc<AgentLifecycle>,
    interval: Duration,
    stop: watch::Sender<bool>,
}

impl LifecycleWorker {
    pub fn new(lifecycle: Arc<AgentLifecycle>, interval: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            lifecycle,
            interval,
            stop,
        }
    }
}

#[async_trait::async_trait]
impl ServiceComponent for LifecycleWorker {
    fn name(&self) -> &'static str {
        "agent-lifecycle"
    }

    async fn on_start(&mut self) -> Result<()> {
        let sweep = self.lifecycle.clone();
        tokio::spawn(async move {
            recover_orphans(&sweep).await;
        });

        let lifecycle = self.lifecycle.clone();
        spawn_ticker(self.interval, self.stop.subscribe(), move || {
            let lifecycle = lifecycle.clone();
            async move {
                if let Err(e) = lifecycle.flush_logs().await {
                    warn!(error = %e, "periodic log flush failed");
                }
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        let _ = self.stop.send(true);
        self.lifecycle.shutdown().await;
        Ok(())
    }
}

pub struct RouterWorker {
    router: Arc<EventRouter>,
    interval: Duration,
    stop: watch::Sender<bool>,
}

impl RouterWorker {
    pub fn new(router: Arc<EventRouter>, interval: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            router,
            interval,
            stop,
        }
    }
}

#[async_trait::async_trait]
impl ServiceComponent for RouterWorker {
    fn name(&self) -> &'static str {
        "event-router"
    }

    async fn on_start(&mut self) -> Result<()> {
        let router = self.router.clone();
        spawn_ticker(self.interval, self.stop.subscribe(), move || {
            let router = router.clone();
            async move {
                router.tick().await;
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        let _ = self.stop.send(true);
        Ok(())
    }
}

pub struct QueueWorker {
    processor: Arc<QueueProcessor>,
    interval: Duration,
    stop: watch::Sender<bool>,
}

impl QueueWorker {
    pub fn new(processor: Arc<QueueProcessor>, interval: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            processor,
            interval,
            stop,
        }
    }
}

#[async_trait::async_trait]
impl ServiceComponent for QueueWorker {
    fn name(&self) -> &'static str {
        "queue-processor"
    }

    async fn on_start(&mut self) -> Result<()> {
        let processor = self.processor.clone();
        spawn_ticker(self.interval, self.stop.subscribe(), move || {
            let processor = processor.clone();
            async move {
                if let Err(e) = processor.tick().await {
                    warn!(error = %e, "queue tick failed");
                }
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        let _ = self.stop.send(true);
        Ok(())
    }
}
