mod handlers;
mod router;

use anyhow::Result;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::core::agents::AgentLifecycle;
use crate::core::service::ServiceComponent;
use crate::core::spool::EventSpool;
use crate::core::store::Store;
use crate::core::workspace::WorkspaceManager;

#[derive(Clone)]
pub struct AppState {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) store: Store,
    pub(crate) spool: EventSpool,
    pub(crate) lifecycle: Arc<AgentLifecycle>,
    pub(crate) workspace: WorkspaceManager,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Store,
        spool: EventSpool,
        lifecycle: Arc<AgentLifecycle>,
        log_tx: tokio::sync::broadcast::Sender<String>,
    ) -> Self {
        let workspace = WorkspaceManager::new(&config);
        Self {
            state: AppState {
                config,
                store,
                spool,
                lifecycle,
                workspace,
                log_tx,
            },
        }
    }
}

#[async_trait::async_trait]
impl ServiceComponent for ApiServer {
    fn name(&self) -> &'static str {
        "api-server"
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.state.config.port);
        // Bind synchronously: a taken port is a startup failure, not a
        // background warning.
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("api listening on http://{}", addr);

        let app = router::build_router(self.state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "api server crashed");
            }
        });
        Ok(())
    }
}

/// Live tail of the service's own tracing output.
pub(crate) async fn logs_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(SseEvent::default().data(line)),
        Err(_) => Ok(SseEvent::default().data("log stream lagged")),
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
