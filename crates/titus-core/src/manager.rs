//! Update manager: owns the single active transport.
//!
//! Lifecycle: `Idle -> Starting(run_type) -> Running(run_type) -> Stopping -> Idle`.
//! - Long polling: a fresh Bot API client is bootstrapped (`getMe` +
//!   `deleteWebhook`) under the startup deadline, then a poll loop feeds the
//!   session.
//! - Transmitter: updates arrive over the push connection. Each update id is
//!   admitted at most once per retention window and acknowledged to the relay
//!   once its handler chain finished.
//! - A transmitter disconnect/error stops the bot and arms a one-shot watcher
//!   that restarts it on the next `connect`. There is no fallback to long
//!   polling.
//!
//! Start/stop/restart are serialized, so two transports never run at once.

use std::{
    sync::{Arc, Mutex, MutexGuard, RwLock},
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    dedup::UpdateFilter,
    domain::{BotIdentity, RunType, UpdateId},
    ports::{BotApi, BotApiFactory, ConnectionEvent, PushConnection},
    session::BotSession,
    timeout::TimeoutGuard,
    update::{Update, ALLOWED_UPDATES},
    Error, Result,
};

pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Clone, Copy, Debug)]
pub struct ManagerConfig {
    /// Deadline for the bootstrap calls of a start.
    pub startup_timeout: Duration,
    /// Server-side long poll timeout.
    pub poll_timeout: Duration,
    /// Pause after a failed `getUpdates`.
    pub poll_retry_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            startup_timeout: STARTUP_TIMEOUT,
            poll_timeout: Duration::from_secs(30),
            poll_retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportState {
    #[default]
    Idle,
    Starting(RunType),
    Running(RunType),
    Stopping,
}

type StartedListener = Arc<dyn Fn(&Arc<BotSession>) + Send + Sync>;

#[derive(Clone)]
pub struct UpdateManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    factory: Arc<dyn BotApiFactory>,
    connection: Option<Arc<dyn PushConnection>>,
    filter: UpdateFilter,
    cfg: ManagerConfig,
    // Serializes start/stop/restart.
    lifecycle: tokio::sync::Mutex<()>,
    state: Mutex<ManagerState>,
    listeners: RwLock<Vec<StartedListener>>,
}

#[derive(Default)]
struct ManagerState {
    transport: TransportState,
    session: Option<Arc<BotSession>>,
    reconnect: Option<CancellationToken>,
    sweeper: Option<CancellationToken>,
}

impl UpdateManager {
    pub fn new(
        factory: Arc<dyn BotApiFactory>,
        connection: Option<Arc<dyn PushConnection>>,
        filter: UpdateFilter,
        cfg: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                factory,
                connection,
                filter,
                cfg,
                lifecycle: tokio::sync::Mutex::new(()),
                state: Mutex::new(ManagerState::default()),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a callback fired with the live session exactly once per
    /// successful start, before any update is delivered to it.
    ///
    /// Callbacks run while the manager is mid-start and must not call back
    /// into `start`/`stop`/`restart`.
    pub fn on_started<F>(&self, listener: F)
    where
        F: Fn(&Arc<BotSession>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(listener));
    }

    pub fn has_connection(&self) -> bool {
        self.inner.connection.is_some()
    }

    pub fn filter(&self) -> &UpdateFilter {
        &self.inner.filter
    }

    pub fn state(&self) -> TransportState {
        self.lock_state().transport
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), TransportState::Running(_))
    }

    pub fn is_run_type(&self, run_type: RunType) -> bool {
        self.state() == TransportState::Running(run_type)
    }

    /// Current session, once the bot is running.
    pub fn session(&self) -> Option<Arc<BotSession>> {
        self.lock_state().session.clone()
    }

    /// Start the bot. A no-op if a transport is already active.
    pub async fn start(&self, run_type: RunType) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.start_locked(run_type).await
    }

    /// Stop the bot and cancel a pending reconnect. Stopping an idle manager
    /// is a no-op.
    pub async fn stop(&self) {
        {
            let mut st = self.lock_state();
            if let Some(token) = st.reconnect.take() {
                token.cancel();
            }
            if let Some(token) = st.sweeper.take() {
                token.cancel();
            }
        }
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.shutdown_locked();
    }

    pub async fn restart(&self, run_type: RunType) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.restart_locked(run_type).await
    }

    /// Restart on behalf of a reconnect watcher. Returns `false` without
    /// touching the transport when `token` was cancelled, which `stop` does
    /// before it takes the lifecycle lock.
    async fn restart_if(&self, token: &CancellationToken, run_type: RunType) -> Result<bool> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        {
            // A replaced watcher's token is cancelled under this same lock, so
            // an uncancelled token is still the armed one.
            let mut st = self.lock_state();
            if token.is_cancelled() {
                return Ok(false);
            }
            st.reconnect = None;
        }
        self.restart_locked(run_type).await?;
        Ok(true)
    }

    async fn restart_locked(&self, run_type: RunType) -> Result<()> {
        info!(%run_type, "restarting bot");
        self.shutdown_locked();
        self.start_locked(run_type).await?;
        info!(%run_type, "bot restarted");
        Ok(())
    }

    async fn start_locked(&self, run_type: RunType) -> Result<()> {
        let current = self.state();
        if current != TransportState::Idle {
            debug!(?current, "start requested while not idle, ignoring");
            return Ok(());
        }

        let connection = match run_type {
            RunType::LongPolling => None,
            RunType::Transmitter => match &self.inner.connection {
                Some(c) => Some(c.clone()),
                None => {
                    return Err(Error::Config(
                        "a transmitter connection is required for transmitter mode".to_string(),
                    ))
                }
            },
        };

        info!(%run_type, "launching bot");
        self.set_transport(TransportState::Starting(run_type));
        self.ensure_sweeper();

        let api = self.inner.factory.create();
        let identity = match self.bootstrap(api.as_ref(), run_type).await {
            Ok(identity) => identity,
            Err(e) => {
                self.set_transport(TransportState::Idle);
                error!(%run_type, "bot start failed: {e}");
                return Err(e);
            }
        };

        let session = Arc::new(BotSession::new(api, identity, run_type));

        match connection {
            None => {
                self.activate(&session);
                self.spawn_polling(session);
            }
            Some(conn) => {
                if !conn.is_connected() {
                    warn!("transmitter is not connected yet, waiting for updates anyway");
                }
                // Subscribe before going live so no update slips between.
                let events = conn.subscribe();
                self.activate(&session);
                self.spawn_transmitter_listener(session, conn, events);
            }
        }

        Ok(())
    }

    /// `getMe` (plus `deleteWebhook` for long polling) under the startup
    /// deadline. A late success after the deadline fired is discarded.
    async fn bootstrap(&self, api: &dyn BotApi, run_type: RunType) -> Result<BotIdentity> {
        let deadline = self.inner.cfg.startup_timeout;
        let guard = TimeoutGuard::new();
        let (timed_out_tx, timed_out_rx) = oneshot::channel::<()>();
        guard.start(deadline, move || {
            let _ = timed_out_tx.send(());
        });

        let calls = async {
            let identity = api.get_me().await?;
            if run_type == RunType::LongPolling {
                api.delete_webhook().await?;
            }
            Ok::<_, Error>(identity)
        };

        tokio::select! {
            res = calls => {
                if !guard.stop() {
                    return Err(Error::StartupTimeout(deadline));
                }
                res
            }
            _ = timed_out_rx => Err(Error::StartupTimeout(deadline)),
        }
    }

    fn activate(&self, session: &Arc<BotSession>) {
        {
            let mut st = self.lock_state();
            st.transport = TransportState::Running(session.run_type());
            st.session = Some(session.clone());
        }

        let listeners = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener(session);
        }

        info!(
            run_type = %session.run_type(),
            bot = session.identity().username.as_deref().unwrap_or("unknown"),
            "bot started"
        );
    }

    fn shutdown_locked(&self) {
        let session = {
            let mut st = self.lock_state();
            if st.transport == TransportState::Idle {
                return;
            }
            st.transport = TransportState::Stopping;
            st.session.take()
        };

        info!("stopping bot");
        if let Some(session) = session {
            session.stop();
        }
        self.set_transport(TransportState::Idle);
        info!("bot stopped");
    }

    /// Stop `session` if it is still the current one. Returns whether it was.
    async fn shutdown_session(&self, session: &Arc<BotSession>) -> bool {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let is_current = self
            .lock_state()
            .session
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, session));
        if is_current {
            self.shutdown_locked();
        } else {
            session.stop();
        }
        is_current
    }

    fn spawn_polling(&self, session: Arc<BotSession>) {
        let manager = self.clone();
        let cfg = self.inner.cfg;
        tokio::spawn(async move {
            let cancel = session.cancellation().clone();
            let mut offset: Option<UpdateId> = None;
            loop {
                let res = tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = session.api().get_updates(offset, cfg.poll_timeout, ALLOWED_UPDATES) => res,
                };
                match res {
                    Ok(updates) => {
                        for update in updates {
                            offset = Some(update.id.next());
                            manager.dispatch(&session, update);
                        }
                    }
                    Err(e) => {
                        warn!("getUpdates failed: {e}");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(cfg.poll_retry_delay) => {}
                        }
                    }
                }
            }
            debug!("long polling loop finished");
        });
    }

    fn spawn_transmitter_listener(
        &self,
        session: Arc<BotSession>,
        conn: Arc<dyn PushConnection>,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            let cancel = session.cancellation().clone();
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    ev = events.recv() => ev,
                };
                match event {
                    Some(ConnectionEvent::Update(update)) => manager.admit(&session, *update),
                    Some(ConnectionEvent::Connect) => {}
                    Some(ConnectionEvent::Disconnect(reason)) => {
                        warn!(%reason, "transmitter disconnected");
                        manager.connection_lost(&session, &conn).await;
                        break;
                    }
                    Some(ConnectionEvent::Error(e)) => {
                        warn!("transmitter error: {e}");
                        manager.connection_lost(&session, &conn).await;
                        break;
                    }
                    None => {
                        warn!("transmitter event stream closed");
                        manager.connection_lost(&session, &conn).await;
                        break;
                    }
                }
            }
            debug!("transmitter listener finished");
        });
    }

    /// Dedup gate for pushed updates. The id is remembered here, before any
    /// await, so a duplicate arriving while the first copy is in flight is
    /// dropped.
    fn admit(&self, session: &Arc<BotSession>, update: Update) {
        if !self.inner.filter.admit(update.id) {
            debug!(update_id = %update.id, "update already processed, skipping");
            return;
        }
        self.dispatch(session, update);
    }

    /// Handle the update on its own task; acknowledge it afterwards when
    /// running in transmitter mode.
    fn dispatch(&self, session: &Arc<BotSession>, update: Update) {
        let manager = self.clone();
        let session = session.clone();
        tokio::spawn(async move {
            session.handle_update(&update).await;
            manager.acknowledge(update.id).await;
        });
    }

    async fn acknowledge(&self, id: UpdateId) {
        if !self.is_run_type(RunType::Transmitter) {
            return;
        }
        self.inner.filter.remember(id);
        let Some(conn) = &self.inner.connection else {
            return;
        };
        if let Err(e) = conn.update_processed(id).await {
            warn!(update_id = %id, "failed to acknowledge update: {e}");
        }
    }

    /// Stop the bot and restart it in transmitter mode on the next `connect`.
    async fn connection_lost(&self, session: &Arc<BotSession>, conn: &Arc<dyn PushConnection>) {
        // Armed before stopping so a quick reconnect is not missed.
        let mut events = conn.subscribe();
        let token = CancellationToken::new();
        {
            let mut st = self.lock_state();
            if let Some(prev) = st.reconnect.replace(token.clone()) {
                prev.cancel();
            }
        }

        let manager = self.clone();
        let watcher = token.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = watcher.cancelled() => return,
                    ev = events.recv() => ev,
                };
                match event {
                    Some(ConnectionEvent::Connect) => break,
                    Some(_) => continue,
                    None => return,
                }
            }

            info!("transmitter reconnected");
            match manager.restart_if(&watcher, RunType::Transmitter).await {
                Ok(true) => {}
                Ok(false) => debug!("reconnect superseded, not restarting"),
                Err(e) => error!("failed to restart bot after reconnect: {e}"),
            }
        });

        if !self.shutdown_session(session).await {
            // Someone else already stopped this session.
            token.cancel();
        }
    }

    fn ensure_sweeper(&self) {
        let mut st = self.lock_state();
        if st.sweeper.is_some() {
            return;
        }
        let token = CancellationToken::new();
        self.inner.filter.spawn_sweeper(token.clone());
        st.sweeper = Some(token);
    }

    fn set_transport(&self, transport: TransportState) {
        self.lock_state().transport = transport;
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
