//! Live bot session: the Bot API client bound to one update-delivery
//! strategy plus the ordered handler chain updates are fed through.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    domain::{BotIdentity, RunType},
    ports::BotApi,
    update::Update,
    Result,
};

/// Whether the handler chain should keep going for the current update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Next,
    Stop,
}

#[async_trait]
pub trait UpdateHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, session: &BotSession, update: &Update) -> Result<Flow>;
}

pub struct BotSession {
    api: Arc<dyn BotApi>,
    identity: BotIdentity,
    run_type: RunType,
    cancel: CancellationToken,
    handlers: RwLock<Vec<Arc<dyn UpdateHandler>>>,
}

impl BotSession {
    pub fn new(api: Arc<dyn BotApi>, identity: BotIdentity, run_type: RunType) -> Self {
        Self {
            api,
            identity,
            run_type,
            cancel: CancellationToken::new(),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn api(&self) -> &Arc<dyn BotApi> {
        &self.api
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    pub fn run_type(&self) -> RunType {
        self.run_type
    }

    /// Cancelled when the session is stopped; delivery tasks watch it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }

    /// Append a handler to the end of the chain.
    pub fn attach(&self, handler: Arc<dyn UpdateHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Run the update through the handler chain. A failing handler is logged
    /// and ends the chain for this update.
    pub async fn handle_update(&self, update: &Update) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        if handlers.is_empty() {
            warn!(update_id = %update.id, "no handlers attached, update dropped");
            return;
        }

        for handler in handlers {
            match handler.handle(self, update).await {
                Ok(Flow::Next) => continue,
                Ok(Flow::Stop) => break,
                Err(e) => {
                    error!(update_id = %update.id, handler = handler.name(), "handler failed: {e}");
                    break;
                }
            }
        }
    }
}
