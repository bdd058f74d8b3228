//! The externally visible bot service: update manager plus the handler chain.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::info;

use crate::{
    domain::RunType,
    manager::UpdateManager,
    moderation::ModerationPipeline,
    welcome::WelcomeHandler,
    Result,
};

pub struct TitusBot {
    manager: UpdateManager,
    welcome: Arc<WelcomeHandler>,
    moderation: Arc<ModerationPipeline>,
    wired: AtomicBool,
}

impl TitusBot {
    pub fn new(
        manager: UpdateManager,
        welcome: WelcomeHandler,
        moderation: ModerationPipeline,
    ) -> Self {
        Self {
            manager,
            welcome: Arc::new(welcome),
            moderation: Arc::new(moderation),
            wired: AtomicBool::new(false),
        }
    }

    pub fn manager(&self) -> &UpdateManager {
        &self.manager
    }

    /// Transmitter when a push connection was supplied, long polling otherwise.
    pub fn run_type(&self) -> RunType {
        if self.manager.has_connection() {
            RunType::Transmitter
        } else {
            RunType::LongPolling
        }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.wired.swap(true, Ordering::SeqCst) {
            let welcome = self.welcome.clone();
            let moderation = self.moderation.clone();
            self.manager.on_started(move |session| {
                session.attach(welcome.clone());
                session.attach(moderation.clone());
            });
        }

        let run_type = self.run_type();
        self.manager.start(run_type).await?;
        info!(%run_type, "bot started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.manager.stop().await;
        info!("bot stopped");
    }
}
