//! Telegram adapter (teloxide).
//!
//! This crate implements the `titus-core` BotApi port over the Telegram Bot API.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use teloxide::{
    net::default_reqwest_settings,
    prelude::*,
    types::{InputFile, InputMedia, InputMediaPhoto},
};

use tokio::time::sleep;
use tracing::warn;

pub mod convert;

use titus_core::{
    domain::{BotIdentity, ChatId, MessageId, MessageRef, UpdateId, UserId},
    errors::Error,
    outgoing::OutgoingMediaGroup,
    ports::{BotApi, BotApiFactory},
    update::Update,
    Result,
};

/// HTTP timeout on top of the long-poll timeout.
const REQUEST_SLACK: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct TelegramBotApi {
    bot: Bot,
}

impl TelegramBotApi {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn tg_user(user_id: UserId) -> Result<teloxide::types::UserId> {
        u64::try_from(user_id.0)
            .map(teloxide::types::UserId)
            .map_err(|_| Error::Telegram(format!("invalid user id {}", user_id.0)))
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Telegram(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        warn!(retry_after = ?d, "telegram flood control, retrying");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl BotApi for TelegramBotApi {
    async fn get_me(&self) -> Result<BotIdentity> {
        let me = self.with_retry(|| self.bot.get_me()).await?;
        Ok(BotIdentity {
            id: UserId(me.user.id.0 as i64),
            username: me.user.username.clone(),
            first_name: me.user.first_name.clone(),
        })
    }

    async fn delete_webhook(&self) -> Result<()> {
        self.with_retry(|| self.bot.delete_webhook()).await?;
        Ok(())
    }

    async fn get_updates(
        &self,
        offset: Option<UpdateId>,
        timeout: Duration,
        allowed_updates: &[&str],
    ) -> Result<Vec<Update>> {
        let allowed = convert::allowed_updates(allowed_updates);
        let offset = offset
            .map(|id| {
                i32::try_from(id.0).map_err(|_| Error::Telegram(format!("update id {id} out of range")))
            })
            .transpose()?;
        let timeout_secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);

        let updates = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .get_updates()
                    .timeout(timeout_secs)
                    .allowed_updates(allowed.clone());
                if let Some(o) = offset {
                    req = req.offset(o);
                }
                req
            })
            .await?;

        Ok(updates.into_iter().map(convert::update).collect())
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| self.bot.send_message(Self::tg_chat(chat_id), text.to_string()))
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_media_group(
        &self,
        chat_id: ChatId,
        media: &OutgoingMediaGroup,
    ) -> Result<Vec<MessageRef>> {
        if media.is_empty() {
            return Ok(Vec::new());
        }
        let items: Vec<InputMedia> = media
            .photos
            .iter()
            .map(|p| {
                InputMedia::Photo(InputMediaPhoto::new(
                    InputFile::file(p.path.clone()).file_name(p.file_name.clone()),
                ))
            })
            .collect();

        let sent = self
            .with_retry(|| {
                self.bot
                    .send_media_group(Self::tg_chat(chat_id), items.clone())
            })
            .await?;

        Ok(sent
            .into_iter()
            .map(|m| MessageRef {
                chat_id,
                message_id: MessageId(m.id.0),
            })
            .collect())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }

    async fn ban_chat_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        let user = Self::tg_user(user_id)?;
        self.with_retry(|| self.bot.ban_chat_member(Self::tg_chat(chat_id), user))
            .await?;
        Ok(())
    }
}

/// Hands out a fresh teloxide `Bot` per (re)start. The HTTP client is shared.
pub struct TelegramBotFactory {
    token: String,
    client: reqwest::Client,
}

impl TelegramBotFactory {
    /// `poll_timeout` is the long-poll timeout the manager will request; the
    /// HTTP client must outlive it.
    pub fn new(token: impl Into<String>, poll_timeout: Duration) -> Result<Self> {
        let client = default_reqwest_settings()
            .timeout(poll_timeout + REQUEST_SLACK)
            .build()
            .map_err(|e| Error::Config(format!("failed to build telegram http client: {e}")))?;
        Ok(Self {
            token: token.into(),
            client,
        })
    }
}

impl BotApiFactory for TelegramBotFactory {
    fn create(&self) -> Arc<dyn BotApi> {
        Arc::new(TelegramBotApi::new(Bot::with_client(
            self.token.clone(),
            self.client.clone(),
        )))
    }
}
