//! Service bootstrap: long-lived components attach to a manager that drives
//! them through init, start, and shutdown phases. Shutdown runs in reverse
//! attach order so consumers stop before the stores they depend on.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, PartialEq)]
pub enum ServicePhase {
    Init,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait ServiceComponent: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct ServiceManager {
    phase: ServicePhase,
    components: Vec<Arc<Mutex<dyn ServiceComponent>>>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            phase: ServicePhase::Init,
            components: Vec::new(),
        }
    }

    pub fn attach(&mut self, component: Arc<Mutex<dyn ServiceComponent>>) {
        self.components.push(component);
    }

    /// Run init then start across all components, in attach order. A failure
    /// aborts startup and propagates.
    pub async fn start(&mut self) -> Result<()> {
        self.phase = ServicePhase::Init;
        for component in &self.components {
            let mut component = component.lock().await;
            info!("init: {}", component.name());
            component.on_init().await?;
        }
        for component in &self.components {
            let mut component = component.lock().await;
            info!("start: {}", component.name());
            component.on_start().await?;
        }
        self.phase = ServicePhase::Ready;
        Ok(())
    }

    /// Stop components in reverse attach order; shutdown errors are logged,
    /// never propagated.
    pub async fn shutdown(&mut self) {
        self.phase = ServicePhase::Shutdown;
        for component in self.components.iter().rev() {
            let mut component = component.lock().await;
            info!("shutdown: {}", component.name());
            if let Err(e) = component.on_shutdown().await {
                warn!(component = component.name(), error = %e, "component shutdown error");
            }
        }
    }

    pub fn phase(&self) -> &ServicePhase {
        &self.phase
    }
}
