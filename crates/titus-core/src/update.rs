//! Incoming update model.
//!
//! Only the parts of a Telegram update the moderation pipeline inspects are
//! modelled; everything else is carried as [`UpdateKind::Other`]. The serde
//! shape follows the Bot API JSON so updates relayed by the transmitter can be
//! parsed directly.

use serde::Deserialize;

use crate::domain::{ChatId, MessageId, MessageRef, UpdateId, UserId};

/// Update kinds requested from the Bot API when long polling.
///
/// `chat_member` is never delivered unless explicitly requested.
pub const ALLOWED_UPDATES: &[&str] = &[
    "message",
    "edited_message",
    "channel_post",
    "edited_channel_post",
    "message_reaction",
    "message_reaction_count",
    "inline_query",
    "chosen_inline_result",
    "callback_query",
    "shipping_query",
    "pre_checkout_query",
    "poll",
    "poll_answer",
    "my_chat_member",
    "chat_member",
    "chat_join_request",
    "chat_boost",
    "removed_chat_boost",
];

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(from = "RawUpdate")]
pub struct Update {
    pub id: UpdateId,
    pub kind: UpdateKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateKind {
    Message(Message),
    EditedMessage(Message),
    ChatMember(ChatMemberUpdated),
    Other,
}

impl Update {
    pub fn new(id: UpdateId, kind: UpdateKind) -> Self {
        Self { id, kind }
    }

    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawUpdate {
    update_id: UpdateId,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    edited_message: Option<Message>,
    #[serde(default)]
    chat_member: Option<ChatMemberUpdated>,
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        let kind = if let Some(m) = raw.message {
            UpdateKind::Message(m)
        } else if let Some(m) = raw.edited_message {
            UpdateKind::EditedMessage(m)
        } else if let Some(c) = raw.chat_member {
            UpdateKind::ChatMember(c)
        } else {
            UpdateKind::Other
        };
        Self {
            id: raw.update_id,
            kind,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl Message {
    /// Text content, falling back to the media caption.
    pub fn content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }

    pub fn author(&self) -> Option<UserId> {
        self.from.as_ref().map(|u| u.id)
    }

    /// Bot command name without the leading `/` and the optional `@botname` suffix.
    pub fn command(&self) -> Option<&str> {
        let text = self.text.as_deref()?.trim_start();
        let word = text.strip_prefix('/')?.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind == ChatKind::Private
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub new_chat_member: ChatMember,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChatMember {
    pub status: MemberStatus,
    pub user: User,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_message_update_with_caption() {
        let raw = json!({
            "update_id": 42,
            "message": {
                "message_id": 7,
                "date": 1700000000,
                "chat": { "id": -100123, "type": "supergroup", "title": "chat" },
                "from": { "id": 555, "is_bot": false, "first_name": "Ann" },
                "caption": "buy now",
                "photo": []
            }
        });

        let upd: Update = serde_json::from_value(raw).unwrap();
        assert_eq!(upd.id, UpdateId(42));
        let msg = upd.message().unwrap();
        assert_eq!(msg.content(), Some("buy now"));
        assert_eq!(msg.author(), Some(UserId(555)));
        assert_eq!(msg.chat.kind, ChatKind::Supergroup);
    }

    #[test]
    fn parses_chat_member_update() {
        let raw = json!({
            "update_id": 43,
            "chat_member": {
                "chat": { "id": -1, "type": "group" },
                "from": { "id": 1, "is_bot": false, "first_name": "a" },
                "date": 0,
                "old_chat_member": { "status": "left", "user": { "id": 9, "is_bot": false, "first_name": "b" } },
                "new_chat_member": { "status": "member", "user": { "id": 9, "is_bot": false, "first_name": "b" } }
            }
        });

        let upd: Update = serde_json::from_value(raw).unwrap();
        let UpdateKind::ChatMember(c) = upd.kind else {
            panic!("expected chat_member update");
        };
        assert_eq!(c.new_chat_member.status, MemberStatus::Member);
        assert_eq!(c.new_chat_member.user.id, UserId(9));
    }

    #[test]
    fn unknown_kinds_map_to_other() {
        let raw = json!({ "update_id": 1, "poll": { "id": "x" } });
        let upd: Update = serde_json::from_value(raw).unwrap();
        assert_eq!(upd.kind, UpdateKind::Other);
    }

    #[test]
    fn command_strips_bot_suffix() {
        let msg: Message = serde_json::from_value(json!({
            "message_id": 1,
            "chat": { "id": 1, "type": "private" },
            "text": "/start@titus_bot hello"
        }))
        .unwrap();
        assert_eq!(msg.command(), Some("start"));
    }
}
