use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    domain::{BotIdentity, ChatId, MessageRef, UpdateId, UserId},
    outgoing::OutgoingMediaGroup,
    update::Update,
    Result,
};

/// Hexagonal port for the Telegram Bot API.
///
/// `delete_message` / `ban_chat_member` fail with a recoverable error when the
/// bot lacks rights or the message is already gone; callers decide whether
/// that matters.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_me(&self) -> Result<BotIdentity>;

    /// Drop any configured webhook so `get_updates` is allowed.
    async fn delete_webhook(&self) -> Result<()>;

    async fn get_updates(
        &self,
        offset: Option<UpdateId>,
        timeout: Duration,
        allowed_updates: &[&str],
    ) -> Result<Vec<Update>>;

    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;
    async fn send_media_group(
        &self,
        chat_id: ChatId,
        media: &OutgoingMediaGroup,
    ) -> Result<Vec<MessageRef>>;

    async fn delete_message(&self, msg: MessageRef) -> Result<()>;
    async fn ban_chat_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;
}

/// Creates a fresh Bot API client. Every (re)start of the update manager asks
/// for a new one.
pub trait BotApiFactory: Send + Sync {
    fn create(&self) -> Arc<dyn BotApi>;
}

// ============== Titorelli services ==============

/// Answer of the CAS ban list for one user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasStatus {
    pub banned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CasStatus {
    pub fn has_totem(&self) -> bool {
        !self.banned && self.reason.as_deref() == Some("totem")
    }
}

#[async_trait]
pub trait CasClient: Send + Sync {
    async fn is_banned(&self, user_id: UserId) -> Result<CasStatus>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Spam,
    Ham,
}

/// Why the classifier produced its label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reason {
    Totem,
    Cas,
    Duplicate,
    Classifier,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Label,
    pub reason: Reason,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PredictRequest {
    pub text: String,
    #[serde(rename = "tgUserId")]
    pub user_id: UserId,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn predict(&self, req: PredictRequest) -> Result<Prediction>;

    /// Grant the user a trust token ("totem"); later messages skip classification.
    async fn protect(&self, user_id: UserId) -> Result<()>;
}

// ============== Transmitter ==============

#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    Connect,
    Disconnect(String),
    Error(String),
    Update(Box<Update>),
}

/// Persistent push connection to the update relay.
#[async_trait]
pub trait PushConnection: Send + Sync {
    /// Receive every connection event emitted from now on. Each subscriber
    /// gets its own unbounded stream, so a slow reader never misses an
    /// update. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent>;

    fn is_connected(&self) -> bool;

    /// Tell the relay an update was processed. Informational only.
    async fn update_processed(&self, id: UpdateId) -> Result<()>;
}
