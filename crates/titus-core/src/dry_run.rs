use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::info;

use crate::{
    domain::{BotIdentity, ChatId, MessageRef, UpdateId, UserId},
    outgoing::OutgoingMediaGroup,
    ports::{BotApi, BotApiFactory},
    update::Update,
    Result,
};

/// BotApi decorator that swallows enforcement calls.
///
/// `delete_message` and `ban_chat_member` are only logged; everything else is
/// forwarded to the wrapped client.
pub struct DryRunBotApi {
    inner: Arc<dyn BotApi>,
}

impl DryRunBotApi {
    pub fn new(inner: Arc<dyn BotApi>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl BotApi for DryRunBotApi {
    async fn get_me(&self) -> Result<BotIdentity> {
        self.inner.get_me().await
    }

    async fn delete_webhook(&self) -> Result<()> {
        self.inner.delete_webhook().await
    }

    async fn get_updates(
        &self,
        offset: Option<UpdateId>,
        timeout: Duration,
        allowed_updates: &[&str],
    ) -> Result<Vec<Update>> {
        self.inner
            .get_updates(offset, timeout, allowed_updates)
            .await
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.inner.send_message(chat_id, text).await
    }

    async fn send_media_group(
        &self,
        chat_id: ChatId,
        media: &OutgoingMediaGroup,
    ) -> Result<Vec<MessageRef>> {
        self.inner.send_media_group(chat_id, media).await
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        info!(
            chat_id = msg.chat_id.0,
            message_id = msg.message_id.0,
            "dry run: message would be deleted"
        );
        Ok(())
    }

    async fn ban_chat_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        info!(
            chat_id = chat_id.0,
            user_id = user_id.0,
            "dry run: user would be banned"
        );
        Ok(())
    }
}

/// Wraps every client produced by `inner` in a [`DryRunBotApi`].
pub struct DryRunFactory<F> {
    inner: F,
}

impl<F: BotApiFactory> DryRunFactory<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: BotApiFactory> BotApiFactory for DryRunFactory<F> {
    fn create(&self) -> Arc<dyn BotApi> {
        Arc::new(DryRunBotApi::new(self.inner.create()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::MessageId, Error};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingApi {
        forwarded: AtomicUsize,
        enforced: AtomicUsize,
    }

    #[async_trait]
    impl BotApi for CountingApi {
        async fn get_me(&self) -> Result<BotIdentity> {
            self.forwarded.fetch_add(1, Ordering::SeqCst);
            Ok(BotIdentity {
                id: UserId(7),
                username: None,
                first_name: "Titus".to_string(),
            })
        }
        async fn delete_webhook(&self) -> Result<()> {
            Ok(())
        }
        async fn get_updates(
            &self,
            _offset: Option<UpdateId>,
            _timeout: Duration,
            _allowed: &[&str],
        ) -> Result<Vec<Update>> {
            Ok(Vec::new())
        }
        async fn send_message(&self, _chat_id: ChatId, _text: &str) -> Result<MessageRef> {
            self.forwarded.fetch_add(1, Ordering::SeqCst);
            Err(Error::Telegram("chat not found".to_string()))
        }
        async fn send_media_group(
            &self,
            _chat_id: ChatId,
            _media: &OutgoingMediaGroup,
        ) -> Result<Vec<MessageRef>> {
            Ok(Vec::new())
        }
        async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
            self.enforced.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn ban_chat_member(&self, _chat_id: ChatId, _user_id: UserId) -> Result<()> {
            self.enforced.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Factory(Arc<CountingApi>);

    impl BotApiFactory for Factory {
        fn create(&self) -> Arc<dyn BotApi> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn enforcement_is_intercepted_and_the_rest_forwarded() {
        let inner = Arc::new(CountingApi::default());
        let api = DryRunFactory::new(Factory(inner.clone())).create();

        api.delete_message(MessageRef {
            chat_id: ChatId(1),
            message_id: MessageId(2),
        })
        .await
        .unwrap();
        api.ban_chat_member(ChatId(1), UserId(3)).await.unwrap();
        assert_eq!(inner.enforced.load(Ordering::SeqCst), 0);

        assert_eq!(api.get_me().await.unwrap().id, UserId(7));
        assert!(api.send_message(ChatId(1), "hi").await.is_err());
        assert_eq!(inner.forwarded.load(Ordering::SeqCst), 2);
    }
}
