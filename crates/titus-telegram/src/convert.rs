//! teloxide types -> core update model.

use teloxide::types::{
    self as tg, AllowedUpdate, ChatMemberStatus, UpdateKind as TgUpdateKind,
};

use titus_core::{
    domain::{ChatId, MessageId, UpdateId, UserId},
    update::{
        Chat, ChatKind, ChatMember, ChatMemberUpdated, MemberStatus, Message, Update, UpdateKind,
        User,
    },
};

pub fn update(upd: tg::Update) -> Update {
    let id = UpdateId(i64::from(upd.id));
    let kind = match upd.kind {
        TgUpdateKind::Message(m) => UpdateKind::Message(message(&m)),
        TgUpdateKind::EditedMessage(m) => UpdateKind::EditedMessage(message(&m)),
        TgUpdateKind::ChatMember(m) => UpdateKind::ChatMember(chat_member_updated(&m)),
        _ => UpdateKind::Other,
    };
    Update::new(id, kind)
}

pub fn message(m: &tg::Message) -> Message {
    Message {
        message_id: MessageId(m.id.0),
        chat: chat(&m.chat),
        from: m.from().map(user),
        text: m.text().map(str::to_string),
        caption: m.caption().map(str::to_string),
    }
}

fn chat(c: &tg::Chat) -> Chat {
    let kind = if c.is_private() {
        ChatKind::Private
    } else if c.is_supergroup() {
        ChatKind::Supergroup
    } else if c.is_group() {
        ChatKind::Group
    } else if c.is_channel() {
        ChatKind::Channel
    } else {
        ChatKind::Unknown
    };
    Chat {
        id: ChatId(c.id.0),
        kind,
    }
}

fn user(u: &tg::User) -> User {
    User {
        id: UserId(u.id.0 as i64),
        is_bot: u.is_bot,
        first_name: u.first_name.clone(),
        username: u.username.clone(),
    }
}

fn chat_member_updated(m: &tg::ChatMemberUpdated) -> ChatMemberUpdated {
    let status = match m.new_chat_member.status() {
        ChatMemberStatus::Owner => MemberStatus::Creator,
        ChatMemberStatus::Administrator => MemberStatus::Administrator,
        ChatMemberStatus::Member => MemberStatus::Member,
        ChatMemberStatus::Restricted => MemberStatus::Restricted,
        ChatMemberStatus::Left => MemberStatus::Left,
        ChatMemberStatus::Banned => MemberStatus::Kicked,
    };
    ChatMemberUpdated {
        chat: chat(&m.chat),
        new_chat_member: ChatMember {
            status,
            user: user(&m.new_chat_member.user),
        },
    }
}

/// Map Bot API update kind names to teloxide's enum. Kinds teloxide cannot
/// request are skipped.
pub fn allowed_updates(names: &[&str]) -> Vec<AllowedUpdate> {
    names
        .iter()
        .filter_map(|name| {
            Some(match *name {
                "message" => AllowedUpdate::Message,
                "edited_message" => AllowedUpdate::EditedMessage,
                "channel_post" => AllowedUpdate::ChannelPost,
                "edited_channel_post" => AllowedUpdate::EditedChannelPost,
                "inline_query" => AllowedUpdate::InlineQuery,
                "chosen_inline_result" => AllowedUpdate::ChosenInlineResult,
                "callback_query" => AllowedUpdate::CallbackQuery,
                "shipping_query" => AllowedUpdate::ShippingQuery,
                "pre_checkout_query" => AllowedUpdate::PreCheckoutQuery,
                "poll" => AllowedUpdate::Poll,
                "poll_answer" => AllowedUpdate::PollAnswer,
                "my_chat_member" => AllowedUpdate::MyChatMember,
                "chat_member" => AllowedUpdate::ChatMember,
                "chat_join_request" => AllowedUpdate::ChatJoinRequest,
                _ => return None,
            })
        })
        .collect()
}
