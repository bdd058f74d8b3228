//! Moderation pipeline.
//!
//! For every new message: CAS pre-check, then the classifier, then exactly one
//! terminal action keyed by the verdict's `(reason, label)`. New chat members
//! only get the CAS check. Delete/ban are best-effort: a failure is logged and
//! the remaining steps still run. An upstream failure (CAS or classifier)
//! leaves the message untouched.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::{
    domain::{ChatId, MessageRef, UpdateId, UserId},
    ports::{BotApi, CasClient, Classifier, Label, PredictRequest, Reason},
    session::{BotSession, Flow, UpdateHandler},
    update::{ChatMemberUpdated, MemberStatus, Message, Update, UpdateKind},
    Result,
};

/// Result of consulting the upstream checks for one update. A totem carries no
/// label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub reason: Reason,
    pub label: Option<Label>,
}

impl Verdict {
    pub fn totem() -> Self {
        Self {
            reason: Reason::Totem,
            label: None,
        }
    }

    pub fn cas_banned() -> Self {
        Self {
            reason: Reason::Cas,
            label: Some(Label::Spam),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Pass,
    Delete,
    DeleteAndBan,
    GrantTotem,
    Ban,
}

/// Terminal action for a verdict.
pub fn action_for(verdict: Verdict) -> Action {
    match (verdict.reason, verdict.label) {
        (Reason::Totem, _) | (_, None) => Action::Pass,
        (Reason::Cas, Some(Label::Spam)) => Action::DeleteAndBan,
        (Reason::Cas, Some(Label::Ham)) => Action::Pass,
        (Reason::Duplicate, Some(Label::Spam)) => Action::Delete,
        (Reason::Duplicate, Some(Label::Ham)) => Action::GrantTotem,
        (Reason::Classifier, Some(Label::Spam)) => Action::Delete,
        (Reason::Classifier, Some(Label::Ham)) => Action::GrantTotem,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to moderate (no text, no author, not a join).
    Ignored,
    /// An upstream check failed; no action was taken.
    Inconclusive,
    Decided { verdict: Verdict, action: Action },
}

pub struct ModerationPipeline {
    cas: Arc<dyn CasClient>,
    classifier: Arc<dyn Classifier>,
}

impl ModerationPipeline {
    pub fn new(cas: Arc<dyn CasClient>, classifier: Arc<dyn Classifier>) -> Self {
        Self { cas, classifier }
    }

    pub async fn moderate_message(
        &self,
        api: &dyn BotApi,
        update_id: UpdateId,
        msg: &Message,
    ) -> Outcome {
        let Some(author) = msg.author() else {
            info!(%update_id, chat_id = msg.chat.id.0, "message has no author, skipping");
            return Outcome::Ignored;
        };
        let Some(text) = msg.content() else {
            warn!(%update_id, user_id = author.0, "received empty message");
            return Outcome::Ignored;
        };

        let cas = match self.cas.is_banned(author).await {
            Ok(v) => v,
            Err(e) => {
                error!(%update_id, user_id = author.0, "CAS check failed, leaving message as is: {e}");
                return Outcome::Inconclusive;
            }
        };

        let verdict = if cas.banned {
            info!(%update_id, user_id = author.0, "user failed CAS check");
            Verdict::cas_banned()
        } else if cas.has_totem() {
            info!(%update_id, user_id = author.0, "user passed because has totem");
            Verdict::totem()
        } else {
            let req = PredictRequest {
                text: text.to_string(),
                user_id: author,
            };
            match self.classifier.predict(req).await {
                Ok(p) => {
                    info!(%update_id, user_id = author.0, label = ?p.label, reason = ?p.reason, "classification result");
                    Verdict {
                        reason: p.reason,
                        label: Some(p.label),
                    }
                }
                Err(e) => {
                    error!(%update_id, user_id = author.0, "classifier failed, leaving message as is: {e}");
                    return Outcome::Inconclusive;
                }
            }
        };

        let action = action_for(verdict);
        self.apply(api, update_id, msg.message_ref(), author, action)
            .await;
        Outcome::Decided { verdict, action }
    }

    /// CAS check for a user who just became a chat member.
    pub async fn check_new_member(
        &self,
        api: &dyn BotApi,
        update_id: UpdateId,
        upd: &ChatMemberUpdated,
    ) -> Outcome {
        if upd.new_chat_member.status != MemberStatus::Member {
            return Outcome::Ignored;
        }
        let user_id = upd.new_chat_member.user.id;

        let cas = match self.cas.is_banned(user_id).await {
            Ok(v) => v,
            Err(e) => {
                error!(%update_id, user_id = user_id.0, "CAS check on join failed: {e}");
                return Outcome::Inconclusive;
            }
        };

        if !cas.banned {
            let verdict = if cas.has_totem() {
                Verdict::totem()
            } else {
                Verdict {
                    reason: Reason::Cas,
                    label: Some(Label::Ham),
                }
            };
            return Outcome::Decided {
                verdict,
                action: Action::Pass,
            };
        }

        try_ban(api, update_id, upd.chat.id, user_id).await;
        info!(%update_id, user_id = user_id.0, chat_id = upd.chat.id.0, "user failed CAS check on entrance, banned");
        Outcome::Decided {
            verdict: Verdict::cas_banned(),
            action: Action::Ban,
        }
    }

    async fn apply(
        &self,
        api: &dyn BotApi,
        update_id: UpdateId,
        msg: MessageRef,
        author: UserId,
        action: Action,
    ) {
        match action {
            Action::Pass => {
                info!(%update_id, user_id = author.0, "message preserved");
            }
            Action::Delete => {
                try_delete(api, update_id, msg, author).await;
                info!(%update_id, user_id = author.0, "message deleted");
            }
            Action::DeleteAndBan => {
                try_delete(api, update_id, msg, author).await;
                try_ban(api, update_id, msg.chat_id, author).await;
                info!(%update_id, user_id = author.0, "message deleted, user banned");
            }
            Action::Ban => {
                try_ban(api, update_id, msg.chat_id, author).await;
                info!(%update_id, user_id = author.0, "user banned");
            }
            Action::GrantTotem => match self.classifier.protect(author).await {
                Ok(()) => info!(%update_id, user_id = author.0, "message preserved, totem granted"),
                Err(e) => error!(%update_id, user_id = author.0, "failed to grant totem: {e}"),
            },
        }
    }
}

async fn try_delete(api: &dyn BotApi, update_id: UpdateId, msg: MessageRef, author: UserId) {
    if let Err(e) = api.delete_message(msg).await {
        error!(
            %update_id,
            user_id = author.0,
            chat_id = msg.chat_id.0,
            message_id = msg.message_id.0,
            "error when deleting message: {e}"
        );
    }
}

async fn try_ban(api: &dyn BotApi, update_id: UpdateId, chat_id: ChatId, user_id: UserId) {
    if let Err(e) = api.ban_chat_member(chat_id, user_id).await {
        error!(
            %update_id,
            user_id = user_id.0,
            chat_id = chat_id.0,
            "error when banning chat member: {e}"
        );
    }
}

#[async_trait]
impl UpdateHandler for ModerationPipeline {
    fn name(&self) -> &'static str {
        "moderation"
    }

    async fn handle(&self, session: &BotSession, update: &Update) -> Result<Flow> {
        let api = session.api().as_ref();
        match &update.kind {
            UpdateKind::Message(msg) => {
                self.moderate_message(api, update.id, msg).await;
            }
            UpdateKind::ChatMember(member) => {
                self.check_new_member(api, update.id, member).await;
            }
            UpdateKind::EditedMessage(_) | UpdateKind::Other => {}
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{BotIdentity, MessageId},
        dry_run::DryRunBotApi,
        outgoing::OutgoingMediaGroup,
        ports::{CasStatus, Prediction},
        update::{Chat, ChatKind, ChatMember, User},
        Error,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Delete(MessageRef),
        Ban(ChatId, UserId),
    }

    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<Call>>,
        fail_delete: bool,
    }

    impl FakeApi {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BotApi for FakeApi {
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
        async fn send_message(&self, _chat_id: ChatId, _text: &str) -> Result<MessageRef> {
            Err(Error::External("unused".to_string()))
        }
        async fn send_media_group(
            &self,
            _chat_id: ChatId,
            _media: &OutgoingMediaGroup,
        ) -> Result<Vec<MessageRef>> {
            Ok(Vec::new())
        }
        async fn delete_message(&self, msg: MessageRef) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Delete(msg));
            if self.fail_delete {
                return Err(Error::Telegram("message to delete not found".to_string()));
            }
            Ok(())
        }
        async fn ban_chat_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Ban(chat_id, user_id));
            Ok(())
        }
    }

    struct FakeCas {
        status: Option<CasStatus>,
    }

    #[async_trait]
    impl CasClient for FakeCas {
        async fn is_banned(&self, _user_id: UserId) -> Result<CasStatus> {
            self.status
                .clone()
                .ok_or_else(|| Error::External("cas unreachable".to_string()))
        }
    }

    #[derive(Default)]
    struct FakeClassifier {
        prediction: Option<Prediction>,
        predicts: AtomicUsize,
        protected: Mutex<Vec<UserId>>,
    }

    #[async_trait]
    impl Classifier for FakeClassifier {
        async fn predict(&self, _req: PredictRequest) -> Result<Prediction> {
            self.predicts.fetch_add(1, Ordering::SeqCst);
            self.prediction
                .ok_or_else(|| Error::External("model unreachable".to_string()))
        }

        async fn protect(&self, user_id: UserId) -> Result<()> {
            self.protected.lock().unwrap().push(user_id);
            Ok(())
        }
    }

    const CHAT: ChatId = ChatId(-100);
    const AUTHOR: UserId = UserId(42);

    fn msg(text: Option<&str>, caption: Option<&str>) -> Message {
        Message {
            message_id: MessageId(5),
            chat: Chat {
                id: CHAT,
                kind: ChatKind::Supergroup,
            },
            from: Some(User {
                id: AUTHOR,
                is_bot: false,
                first_name: "Spammer".to_string(),
                username: None,
            }),
            text: text.map(str::to_string),
            caption: caption.map(str::to_string),
        }
    }

    fn msg_ref() -> MessageRef {
        MessageRef {
            chat_id: CHAT,
            message_id: MessageId(5),
        }
    }

    fn clean() -> Option<CasStatus> {
        Some(CasStatus {
            banned: false,
            reason: None,
        })
    }

    fn pipeline(
        cas: Option<CasStatus>,
        prediction: Option<Prediction>,
    ) -> (ModerationPipeline, Arc<FakeClassifier>) {
        let classifier = Arc::new(FakeClassifier {
            prediction,
            ..Default::default()
        });
        (
            ModerationPipeline::new(Arc::new(FakeCas { status: cas }), classifier.clone()),
            classifier,
        )
    }

    #[test]
    fn action_table_is_mutually_exclusive() {
        let v = |reason, label| Verdict {
            reason,
            label: Some(label),
        };
        assert_eq!(action_for(v(Reason::Cas, Label::Spam)), Action::DeleteAndBan);
        assert_eq!(action_for(v(Reason::Cas, Label::Ham)), Action::Pass);
        assert_eq!(action_for(v(Reason::Duplicate, Label::Spam)), Action::Delete);
        assert_eq!(action_for(v(Reason::Duplicate, Label::Ham)), Action::GrantTotem);
        assert_eq!(action_for(v(Reason::Classifier, Label::Spam)), Action::Delete);
        assert_eq!(action_for(v(Reason::Classifier, Label::Ham)), Action::GrantTotem);
        assert_eq!(action_for(v(Reason::Totem, Label::Spam)), Action::Pass);
        assert_eq!(action_for(Verdict::totem()), Action::Pass);
    }

    #[tokio::test]
    async fn cas_banned_deletes_then_bans_without_classifier() {
        let (p, classifier) = pipeline(
            Some(CasStatus {
                banned: true,
                reason: None,
            }),
            None,
        );
        let api = FakeApi::default();

        let out = p
            .moderate_message(&api, UpdateId(1), &msg(Some("hello"), None))
            .await;

        assert_eq!(
            out,
            Outcome::Decided {
                verdict: Verdict::cas_banned(),
                action: Action::DeleteAndBan
            }
        );
        assert_eq!(api.calls(), vec![Call::Delete(msg_ref()), Call::Ban(CHAT, AUTHOR)]);
        assert_eq!(classifier.predicts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cas_totem_passes_without_classifier() {
        let (p, classifier) = pipeline(
            Some(CasStatus {
                banned: false,
                reason: Some("totem".to_string()),
            }),
            None,
        );
        let api = FakeApi::default();

        let out = p
            .moderate_message(&api, UpdateId(1), &msg(Some("hello"), None))
            .await;

        assert!(matches!(out, Outcome::Decided { action: Action::Pass, .. }));
        assert!(api.calls().is_empty());
        assert_eq!(classifier.predicts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_spam_deletes_without_ban() {
        let (p, _) = pipeline(
            clean(),
            Some(Prediction {
                label: Label::Spam,
                reason: Reason::Duplicate,
            }),
        );
        let api = FakeApi::default();

        p.moderate_message(&api, UpdateId(1), &msg(None, Some("caption spam")))
            .await;

        assert_eq!(api.calls(), vec![Call::Delete(msg_ref())]);
    }

    #[tokio::test]
    async fn classifier_ham_grants_totem_only() {
        let (p, classifier) = pipeline(
            clean(),
            Some(Prediction {
                label: Label::Ham,
                reason: Reason::Classifier,
            }),
        );
        let api = FakeApi::default();

        p.moderate_message(&api, UpdateId(1), &msg(Some("hi all"), None))
            .await;

        assert!(api.calls().is_empty());
        assert_eq!(*classifier.protected.lock().unwrap(), vec![AUTHOR]);
    }

    #[tokio::test]
    async fn cas_reason_ham_does_not_fall_through_to_totem() {
        let (p, classifier) = pipeline(
            clean(),
            Some(Prediction {
                label: Label::Ham,
                reason: Reason::Cas,
            }),
        );
        let api = FakeApi::default();

        p.moderate_message(&api, UpdateId(1), &msg(Some("hi"), None))
            .await;

        assert!(api.calls().is_empty());
        assert!(classifier.protected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_does_not_prevent_ban() {
        let (p, _) = pipeline(
            clean(),
            Some(Prediction {
                label: Label::Spam,
                reason: Reason::Cas,
            }),
        );
        let api = FakeApi {
            fail_delete: true,
            ..Default::default()
        };

        p.moderate_message(&api, UpdateId(1), &msg(Some("spam"), None))
            .await;

        assert_eq!(api.calls(), vec![Call::Delete(msg_ref()), Call::Ban(CHAT, AUTHOR)]);
    }

    #[tokio::test]
    async fn upstream_failure_is_inconclusive() {
        let api = FakeApi::default();

        let (p, _) = pipeline(None, None);
        let out = p
            .moderate_message(&api, UpdateId(1), &msg(Some("x"), None))
            .await;
        assert_eq!(out, Outcome::Inconclusive);

        let (p, _) = pipeline(clean(), None);
        let out = p
            .moderate_message(&api, UpdateId(2), &msg(Some("x"), None))
            .await;
        assert_eq!(out, Outcome::Inconclusive);

        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_ignored() {
        let (p, classifier) = pipeline(clean(), None);
        let api = FakeApi::default();

        let out = p.moderate_message(&api, UpdateId(1), &msg(None, None)).await;

        assert_eq!(out, Outcome::Ignored);
        assert_eq!(classifier.predicts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn banned_new_member_is_banned_without_delete() {
        let (p, _) = pipeline(
            Some(CasStatus {
                banned: true,
                reason: None,
            }),
            None,
        );
        let api = FakeApi::default();
        let joined = ChatMemberUpdated {
            chat: Chat {
                id: CHAT,
                kind: ChatKind::Supergroup,
            },
            new_chat_member: ChatMember {
                status: MemberStatus::Member,
                user: User {
                    id: AUTHOR,
                    is_bot: false,
                    first_name: "x".to_string(),
                    username: None,
                },
            },
        };

        let out = p.check_new_member(&api, UpdateId(9), &joined).await;

        assert!(matches!(out, Outcome::Decided { action: Action::Ban, .. }));
        assert_eq!(api.calls(), vec![Call::Ban(CHAT, AUTHOR)]);

        let mut left = joined.clone();
        left.new_chat_member.status = MemberStatus::Left;
        assert_eq!(p.check_new_member(&api, UpdateId(10), &left).await, Outcome::Ignored);
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_never_reaches_the_api() {
        let (p, _) = pipeline(
            Some(CasStatus {
                banned: true,
                reason: None,
            }),
            None,
        );
        let inner = Arc::new(FakeApi::default());
        let api = DryRunBotApi::new(inner.clone());

        p.moderate_message(&api, UpdateId(1), &msg(Some("spam"), None))
            .await;

        assert!(inner.calls().is_empty());
    }
}
