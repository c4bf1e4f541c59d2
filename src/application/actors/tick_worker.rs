use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::domain::entities::UserId;
use crate::domain::services::session::WindowKind;

/// A scheduled evaluation for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRequest {
    pub user_id: UserId,
    pub window: WindowKind,
    pub scheduled_for: DateTime<Utc>,
}

/// Message for the tick worker
#[derive(Debug)]
pub enum TickMessage {
    Tick(TickRequest),
    /// Stop accepting ticks; in-flight ticks run to completion.
    Shutdown,
}

/// Something that can run a scheduled tick.
#[async_trait]
pub trait TickHandler: Send + Sync + 'static {
    async fn handle_tick(&self, request: TickRequest);
}

/// Actor that turns tick requests into independent tasks
pub struct TickWorker<H> {
    handler: Arc<H>,
}

impl<H: TickHandler> TickWorker<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<TickMessage>) {
        info!("Starting tick worker");

        loop {
            match rx.recv().await {
                Some(TickMessage::Tick(request)) => {
                    debug!(
                        user_id = request.user_id,
                        window = %request.window,
                        "Dispatching tick"
                    );
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        handler.handle_tick(request).await;
                    });
                }
                Some(TickMessage::Shutdown) => {
                    info!("Tick worker shutting down");
                    break;
                }
                None => {
                    error!("Tick worker message channel closed");
                    break;
                }
            }
        }
    }
}

/// Spawn a tick worker over `handler`
pub fn spawn_tick_worker<H: TickHandler>(
    handler: Arc<H>,
    rx: mpsc::Receiver<TickMessage>,
) -> JoinHandle<()> {
    let worker = TickWorker::new(handler);
    tokio::spawn(async move {
        worker.run(rx).await;
    })
}
