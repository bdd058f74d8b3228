//! Transmitter adapter: WebSocket client for the update relay.
//!
//! Implements the `titus-core` PushConnection port. The client keeps the
//! socket alive on its own, reconnecting with capped exponential backoff, and
//! reports every transition as a [`ConnectionEvent`].

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
    time::sleep,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod protocol;

use protocol::Inbound;
use titus_core::{
    domain::UpdateId,
    errors::Error,
    ports::{ConnectionEvent, PushConnection},
    Result,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct TransmitterConfig {
    pub url: String,
    pub client_id: String,
    pub access_token: String,
    pub bot_token: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl TransmitterConfig {
    pub fn new(
        url: impl Into<String>,
        client_id: impl Into<String>,
        access_token: impl Into<String>,
        bot_token: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            access_token: access_token.into(),
            bot_token: bot_token.into(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[derive(Clone)]
pub struct TransmitterClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    cfg: TransmitterConfig,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl TransmitterClient {
    pub fn new(cfg: TransmitterConfig) -> Result<Self> {
        // Fail on a malformed URL or header value up front.
        build_request(&cfg)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                cfg,
                subscribers: Mutex::new(Vec::new()),
                connected: AtomicBool::new(false),
                outbound: Mutex::new(None),
                task: Mutex::new(None),
            }),
        })
    }

    /// Start the connect/reconnect loop. A no-op if already started.
    pub fn start(&self) {
        let mut task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let client = self.clone();
        let tok = cancel.clone();
        let handle = tokio::spawn(async move { client.run(tok).await });
        *task = Some((cancel, handle));
    }

    pub async fn stop(&self) {
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((cancel, handle)) = task {
            cancel.cancel();
            let _ = handle.await;
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // Dropped receivers are pruned here.
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<String>>) {
        *self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tx;
    }

    async fn run(&self, cancel: CancellationToken) {
        let cfg = &self.inner.cfg;
        let mut backoff = cfg.initial_backoff;
        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.connect() => res,
            };
            match connected {
                Ok(socket) => {
                    backoff = cfg.initial_backoff;
                    info!(url = %cfg.url, "transmitter connected");
                    let (tx, rx) = mpsc::unbounded_channel();
                    self.set_outbound(Some(tx));
                    self.inner.connected.store(true, Ordering::SeqCst);
                    self.emit(ConnectionEvent::Connect);

                    let ended = self.pump(socket, rx, &cancel).await;

                    self.inner.connected.store(false, Ordering::SeqCst);
                    self.set_outbound(None);
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.emit(ended);
                }
                Err(e) => {
                    warn!(url = %cfg.url, retry_in = ?backoff, "transmitter connect failed: {e}");
                    self.emit(ConnectionEvent::Error(e.to_string()));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(backoff) => {}
            }
            backoff = next_backoff(backoff, cfg.max_backoff);
        }
        debug!("transmitter loop finished");
    }

    async fn connect(&self) -> Result<Socket> {
        let req = build_request(&self.inner.cfg)?;
        let (socket, _resp) = connect_async(req)
            .await
            .map_err(|e| Error::Transport(format!("handshake failed: {e}")))?;
        Ok(socket)
    }

    /// Shuttle frames until the socket ends. Returns the event describing why.
    async fn pump(
        &self,
        socket: Socket,
        mut outbound: mpsc::UnboundedReceiver<String>,
        cancel: &CancellationToken,
    ) -> ConnectionEvent {
        let (mut write, mut read) = socket.split();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return ConnectionEvent::Disconnect("client stopped".to_string());
                }
                Some(text) = outbound.recv() => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        return ConnectionEvent::Error(format!("write failed: {e}"));
                    }
                }
                frame = read.next() => match frame {
                    None => return ConnectionEvent::Disconnect("connection closed".to_string()),
                    Some(Err(e)) => return ConnectionEvent::Error(format!("read failed: {e}")),
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "server closed connection".to_string());
                        return ConnectionEvent::Disconnect(reason);
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match protocol::decode(text) {
            Ok(Inbound::Update(update)) => {
                debug!(update_id = %update.id, "update pushed");
                self.emit(ConnectionEvent::Update(Box::new(update)));
            }
            Ok(Inbound::Ignored(event)) => debug!(%event, "ignoring transmitter event"),
            Err(e) => warn!("malformed transmitter frame: {e}"),
        }
    }
}

fn build_request(
    cfg: &TransmitterConfig,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut req = cfg
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Config(format!("invalid transmitter url: {e}")))?;

    let header = |v: &str| {
        HeaderValue::from_str(v)
            .map_err(|e| Error::Config(format!("invalid transmitter header value: {e}")))
    };
    let headers = req.headers_mut();
    headers.insert("x-bot-id", header(&cfg.client_id)?);
    headers.insert(
        "authorization",
        header(&format!("Bearer {}", cfg.access_token))?,
    );
    headers.insert("x-bot-token", header(&cfg.bot_token)?);
    Ok(req)
}

#[async_trait]
impl PushConnection for TransmitterClient {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn update_processed(&self, id: UpdateId) -> Result<()> {
        let text = protocol::encode_update_processed(id)?;
        let outbound = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let Some(tx) = outbound else {
            return Err(Error::Transport("transmitter is not connected".to_string()));
        };
        tx.send(text)
            .map_err(|_| Error::Transport("transmitter connection closed".to_string()))
    }
}
