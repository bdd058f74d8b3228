//! `/start` in a private chat: welcome text plus the setup screenshots.

use std::{collections::HashMap, path::PathBuf, sync::OnceLock};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    outgoing::{OutgoingMediaGroup, OutgoingMessageTemplate},
    session::{BotSession, Flow, UpdateHandler},
    update::Update,
    Result,
};

pub const DEFAULT_SITE_URL: &str = "https://next.titorelli.ru";

fn hello_private_message() -> &'static OutgoingMessageTemplate {
    static TPL: OnceLock<OutgoingMessageTemplate> = OnceLock::new();
    TPL.get_or_init(|| {
        OutgoingMessageTemplate::new(
            r#"
            Добро пожаловать!

            Это бот Титус.

            Он помогает в борьбе против спама в сообществах Telegram.

            Сейчас никаких функций в приватных чатах (таких, как этот) нет, но скоро появятся )

            Если у вас есть группа или канал, можете добавить туда этого бота и назначить его администратором.

            Так же, нужно будет добавить боту права на удаление сообщений.

            Пока на этом все.

            Узнать больше можно тут: {{siteUrl}}
            "#,
        )
    })
}

pub struct WelcomeHandler {
    site_url: String,
    static_dir: PathBuf,
}

impl WelcomeHandler {
    pub fn new(site_url: impl Into<String>, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            site_url: site_url.into(),
            static_dir: static_dir.into(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut params = HashMap::new();
        params.insert("siteUrl", self.site_url.clone());
        hello_private_message().render(&params)
    }
}

#[async_trait]
impl UpdateHandler for WelcomeHandler {
    fn name(&self) -> &'static str {
        "welcome"
    }

    async fn handle(&self, session: &BotSession, update: &Update) -> Result<Flow> {
        let Some(msg) = update.message() else {
            return Ok(Flow::Next);
        };
        if msg.command() != Some("start") || !msg.chat.is_private() {
            return Ok(Flow::Next);
        }

        let api = session.api();
        api.send_message(msg.chat.id, &self.render_text()).await?;
        info!(update_id = %update.id, chat_id = msg.chat.id.0, "welcome message sent");

        let instruction = OutgoingMediaGroup::bot_setup_instruction(&self.static_dir);
        if let Err(e) = api.send_media_group(msg.chat.id, &instruction).await {
            warn!(update_id = %update.id, chat_id = msg.chat.id.0, "failed to send setup instruction: {e}");
        }

        Ok(Flow::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{BotIdentity, ChatId, MessageId, MessageRef, RunType, UpdateId, UserId},
        ports::BotApi,
        update::{Chat, ChatKind, Message, UpdateKind, User},
        Error,
    };
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingApi {
        texts: Mutex<Vec<(ChatId, String)>>,
        albums: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BotApi for RecordingApi {
        async fn get_me(&self) -> Result<BotIdentity> {
            Err(Error::External("unused".to_string()))
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
        async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
            self.texts.lock().unwrap().push((chat_id, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }
        async fn send_media_group(
            &self,
            _chat_id: ChatId,
            media: &OutgoingMediaGroup,
        ) -> Result<Vec<MessageRef>> {
            self.albums.lock().unwrap().push(media.photos.len());
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "titus_bot_1.png",
            )))
        }
        async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
            Ok(())
        }
        async fn ban_chat_member(&self, _chat_id: ChatId, _user_id: UserId) -> Result<()> {
            Ok(())
        }
    }

    fn command(kind: ChatKind, text: &str) -> Update {
        Update::new(
            UpdateId(3),
            UpdateKind::Message(Message {
                message_id: MessageId(10),
                chat: Chat {
                    id: ChatId(77),
                    kind,
                },
                from: Some(User {
                    id: UserId(77),
                    is_bot: false,
                    first_name: "Ann".to_string(),
                    username: None,
                }),
                text: Some(text.to_string()),
                caption: None,
            }),
        )
    }

    fn session(api: Arc<RecordingApi>) -> BotSession {
        BotSession::new(
            api,
            BotIdentity {
                id: UserId(1),
                username: Some("titus_bot".to_string()),
                first_name: "Titus".to_string(),
            },
            RunType::LongPolling,
        )
    }

    #[test]
    fn welcome_text_links_the_site() {
        let text = WelcomeHandler::new("https://example.org", "static").render_text();
        assert!(text.starts_with("Добро пожаловать!\n\nЭто бот Титус."));
        assert!(text.ends_with("Узнать больше можно тут: https://example.org"));
    }

    #[tokio::test]
    async fn private_start_replies_and_stops_chain_even_if_album_fails() {
        let api = Arc::new(RecordingApi::default());
        let s = session(api.clone());
        let h = WelcomeHandler::new(DEFAULT_SITE_URL, "static");

        let flow = h
            .handle(&s, &command(ChatKind::Private, "/start"))
            .await
            .unwrap();

        assert_eq!(flow, Flow::Stop);
        assert_eq!(api.texts.lock().unwrap()[0].0, ChatId(77));
        assert_eq!(*api.albums.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn start_in_group_falls_through() {
        let api = Arc::new(RecordingApi::default());
        let s = session(api.clone());
        let h = WelcomeHandler::new(DEFAULT_SITE_URL, "static");

        let flow = h
            .handle(&s, &command(ChatKind::Supergroup, "/start@titus_bot"))
            .await
            .unwrap();

        assert_eq!(flow, Flow::Next);
        assert!(api.texts.lock().unwrap().is_empty());
    }
}
