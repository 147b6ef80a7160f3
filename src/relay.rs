//! Applies a [`RelayDecision`] through the transport.
//!
//! Failure policy: the primary action of a decision either succeeds or is
//! surfaced to the caller (who logs it and answers the webhook normally — the
//! end user sees silence, not an error). Cleanup actions — deleting the
//! administrator's trigger message, the dual-identity delete attempts — run
//! after the primary action and their failure never cancels it.

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::message::{InboundMessage, MessageBody};
use crate::router::{greeting_html, EditTarget, Registration, RelayDecision};
use crate::transport::Transport;

/// Executor for one registration's decisions. `hub` is the registration
/// service's own bot; when present it gets the first shot at cleanup deletes,
/// since either bot may be the one with admin rights in a group.
pub struct Relay<'a> {
    proxy: &'a dyn Transport,
    hub: Option<&'a dyn Transport>,
}

impl<'a> Relay<'a> {
    pub fn new(proxy: &'a dyn Transport, hub: Option<&'a dyn Transport>) -> Self {
        Self { proxy, hub }
    }

    pub async fn execute(
        &self,
        msg: &InboundMessage,
        reg: &Registration,
        decision: RelayDecision,
    ) -> Result<()> {
        match decision {
            RelayDecision::Ignore => Ok(()),

            RelayDecision::SendGreeting => {
                self.proxy
                    .send_html(reg.admin_id, &greeting_html(&reg.prefix), Some(msg.id))
                    .await?;
                Ok(())
            }

            RelayDecision::ForwardAndNotifyAdmin { marker_html } => {
                let fwd_id = self
                    .proxy
                    .forward_message(reg.admin_id, msg.chat.id, msg.id)
                    .await?;
                // The marker rides along as a reply to the forwarded copy;
                // losing it degrades replies, not the forward itself.
                if let Err(e) = self
                    .proxy
                    .send_html(reg.admin_id, &marker_html, Some(fwd_id))
                    .await
                {
                    warn!("failed to post identity marker: {e:#}");
                }
                Ok(())
            }

            RelayDecision::RelayAdminReply {
                destination_user_id,
                html,
                body,
                reply_to,
            } => {
                self.send_body(destination_user_id, &body, &html, reply_to)
                    .await?;
                Ok(())
            }

            RelayDecision::NotifyAdminOfGroupReply { notice_html } => {
                self.proxy
                    .send_html(reg.admin_id, &notice_html, None)
                    .await?;
                Ok(())
            }

            RelayDecision::PerformDelete {
                target_message_id,
                command_message_id,
            } => {
                if let Err(e) = self
                    .proxy
                    .delete_message(msg.chat.id, target_message_id)
                    .await
                {
                    warn!("deletion of proxy message failed: {e:#}");
                }
                self.failsafe_delete(msg.chat.id, command_message_id).await;
                Ok(())
            }

            RelayDecision::PerformEdit {
                target_message_id,
                new_html,
                target,
                command_message_id,
            } => {
                let edited = match target {
                    EditTarget::Text => {
                        self.proxy
                            .edit_html(msg.chat.id, target_message_id, &new_html)
                            .await
                    }
                    EditTarget::Caption => {
                        self.proxy
                            .edit_caption(msg.chat.id, target_message_id, &new_html)
                            .await
                    }
                };
                match edited {
                    Ok(()) => self.failsafe_delete(msg.chat.id, command_message_id).await,
                    Err(e) => warn!("edit failed: {e:#}"),
                }
                Ok(())
            }

            RelayDecision::EchoWithQuote {
                html,
                body,
                reply_to,
                original_message_id,
            } => {
                if let Err(e) = self.send_body(msg.chat.id, &body, &html, reply_to).await {
                    warn!("echo under proxy identity failed: {e:#}");
                }
                self.failsafe_delete(msg.chat.id, original_message_id).await;
                Ok(())
            }
        }
    }

    async fn send_body(
        &self,
        chat_id: i64,
        body: &MessageBody,
        html: &str,
        reply_to: Option<i32>,
    ) -> Result<i32> {
        match body {
            MessageBody::Text { .. } => self.proxy.send_html(chat_id, html, reply_to).await,
            MessageBody::Photo { file_id, .. } => {
                self.proxy.send_photo(chat_id, file_id, html, reply_to).await
            }
            MessageBody::Document { file_id, .. } => {
                self.proxy
                    .send_document(chat_id, file_id, html, reply_to)
                    .await
            }
            MessageBody::Other => bail!("cannot repost this message kind"),
        }
    }

    /// Try the delete with every identity that might have the rights for it.
    /// All failures are swallowed.
    async fn failsafe_delete(&self, chat_id: i64, message_id: i32) {
        if let Some(hub) = self.hub {
            if let Err(e) = hub.delete_message(chat_id, message_id).await {
                debug!("cleanup delete via hub bot failed: {e:#}");
            }
        }
        if let Err(e) = self.proxy.delete_message(chat_id, message_id).await {
            debug!("cleanup delete via proxy bot failed: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChatKind, ChatRef, UserRef};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Send {
            chat: i64,
            html: String,
            reply_to: Option<i32>,
        },
        SendPhoto {
            chat: i64,
            file_id: String,
        },
        Edit {
            chat: i64,
            id: i32,
            html: String,
        },
        EditCaption {
            chat: i64,
            id: i32,
        },
        Delete {
            chat: i64,
            id: i32,
        },
        Forward {
            to: i64,
            from: i64,
            id: i32,
        },
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        fail_sends: bool,
        fail_edits: bool,
        fail_deletes: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send_html(&self, chat: i64, html: &str, reply_to: Option<i32>) -> Result<i32> {
            self.record(Call::Send {
                chat,
                html: html.to_string(),
                reply_to,
            });
            if self.fail_sends {
                return Err(anyhow!("send rejected"));
            }
            Ok(900)
        }

        async fn send_photo(
            &self,
            chat: i64,
            file_id: &str,
            _caption: &str,
            _reply_to: Option<i32>,
        ) -> Result<i32> {
            self.record(Call::SendPhoto {
                chat,
                file_id: file_id.to_string(),
            });
            if self.fail_sends {
                return Err(anyhow!("send rejected"));
            }
            Ok(901)
        }

        async fn send_document(
            &self,
            chat: i64,
            file_id: &str,
            _caption: &str,
            _reply_to: Option<i32>,
        ) -> Result<i32> {
            self.record(Call::SendPhoto {
                chat,
                file_id: file_id.to_string(),
            });
            if self.fail_sends {
                return Err(anyhow!("send rejected"));
            }
            Ok(902)
        }

        async fn edit_html(&self, chat: i64, id: i32, html: &str) -> Result<()> {
            self.record(Call::Edit {
                chat,
                id,
                html: html.to_string(),
            });
            if self.fail_edits {
                return Err(anyhow!("edit rejected"));
            }
            Ok(())
        }

        async fn edit_caption(&self, chat: i64, id: i32, _html: &str) -> Result<()> {
            self.record(Call::EditCaption { chat, id });
            if self.fail_edits {
                return Err(anyhow!("edit rejected"));
            }
            Ok(())
        }

        async fn delete_message(&self, chat: i64, id: i32) -> Result<()> {
            self.record(Call::Delete { chat, id });
            if self.fail_deletes {
                return Err(anyhow!("delete rejected"));
            }
            Ok(())
        }

        async fn forward_message(&self, to: i64, from: i64, id: i32) -> Result<i32> {
            self.record(Call::Forward { to, from, id });
            Ok(600)
        }
    }

    const ADMIN: i64 = 42;

    fn registration() -> Registration {
        Registration::resolve(ADMIN, "!".to_string(), "7000:AAbb".to_string()).unwrap()
    }

    fn group_message(id: i32) -> InboundMessage {
        InboundMessage {
            id,
            chat: ChatRef {
                id: -4567,
                kind: ChatKind::Group,
                title: Some("RP Den".to_string()),
                username: None,
            },
            from: UserRef {
                id: ADMIN,
                is_bot: false,
                first_name: "Admin".to_string(),
                last_name: None,
                username: None,
            },
            body: MessageBody::Text {
                text: "!hi".to_string(),
            },
            annotations: vec![],
            reply_to: None,
            forward_from: None,
        }
    }

    #[tokio::test]
    async fn forward_posts_marker_as_reply_to_forwarded_copy() {
        let proxy = Recorder::default();
        let relay = Relay::new(&proxy, None);
        let mut msg = group_message(10);
        msg.chat.id = 99;
        msg.chat.kind = ChatKind::Private;

        relay
            .execute(
                &msg,
                &registration(),
                RelayDecision::ForwardAndNotifyAdmin {
                    marker_html: "marker".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            proxy.calls(),
            vec![
                Call::Forward {
                    to: ADMIN,
                    from: 99,
                    id: 10
                },
                Call::Send {
                    chat: ADMIN,
                    html: "marker".to_string(),
                    reply_to: Some(600),
                },
            ]
        );
    }

    #[tokio::test]
    async fn marker_failure_does_not_fail_the_forward() {
        let proxy = Recorder {
            fail_sends: true,
            ..Default::default()
        };
        let relay = Relay::new(&proxy, None);
        let mut msg = group_message(10);
        msg.chat.kind = ChatKind::Private;

        let result = relay
            .execute(
                &msg,
                &registration(),
                RelayDecision::ForwardAndNotifyAdmin {
                    marker_html: "marker".to_string(),
                },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn echo_deletes_original_even_when_send_fails() {
        let proxy = Recorder {
            fail_sends: true,
            ..Default::default()
        };
        let relay = Relay::new(&proxy, None);
        let msg = group_message(10);

        relay
            .execute(
                &msg,
                &registration(),
                RelayDecision::EchoWithQuote {
                    html: "hi".to_string(),
                    body: msg.body.clone(),
                    reply_to: None,
                    original_message_id: 10,
                },
            )
            .await
            .unwrap();

        assert!(proxy
            .calls()
            .contains(&Call::Delete { chat: -4567, id: 10 }));
    }

    #[tokio::test]
    async fn delete_runs_cleanup_through_both_identities() {
        let proxy = Recorder::default();
        let hub = Recorder::default();
        let relay = Relay::new(&proxy, Some(&hub));
        let msg = group_message(9);

        relay
            .execute(
                &msg,
                &registration(),
                RelayDecision::PerformDelete {
                    target_message_id: 8,
                    command_message_id: 9,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            proxy.calls(),
            vec![
                Call::Delete { chat: -4567, id: 8 },
                Call::Delete { chat: -4567, id: 9 },
            ]
        );
        assert_eq!(hub.calls(), vec![Call::Delete { chat: -4567, id: 9 }]);
    }

    #[tokio::test]
    async fn delete_failures_are_swallowed() {
        let proxy = Recorder {
            fail_deletes: true,
            ..Default::default()
        };
        let relay = Relay::new(&proxy, None);
        let msg = group_message(9);

        let result = relay
            .execute(
                &msg,
                &registration(),
                RelayDecision::PerformDelete {
                    target_message_id: 8,
                    command_message_id: 9,
                },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failed_edit_keeps_the_command_message() {
        let proxy = Recorder {
            fail_edits: true,
            ..Default::default()
        };
        let relay = Relay::new(&proxy, None);
        let msg = group_message(9);

        relay
            .execute(
                &msg,
                &registration(),
                RelayDecision::PerformEdit {
                    target_message_id: 8,
                    new_html: "new".to_string(),
                    target: EditTarget::Text,
                    command_message_id: 9,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            proxy.calls(),
            vec![Call::Edit {
                chat: -4567,
                id: 8,
                html: "new".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn successful_edit_deletes_the_command_message() {
        let proxy = Recorder::default();
        let relay = Relay::new(&proxy, None);
        let msg = group_message(9);

        relay
            .execute(
                &msg,
                &registration(),
                RelayDecision::PerformEdit {
                    target_message_id: 8,
                    new_html: "new".to_string(),
                    target: EditTarget::Caption,
                    command_message_id: 9,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            proxy.calls(),
            vec![
                Call::EditCaption { chat: -4567, id: 8 },
                Call::Delete { chat: -4567, id: 9 },
            ]
        );
    }

    #[tokio::test]
    async fn photo_reply_is_relayed_as_photo() {
        let proxy = Recorder::default();
        let relay = Relay::new(&proxy, None);
        let mut msg = group_message(5);
        msg.chat.kind = ChatKind::Private;
        msg.body = MessageBody::Photo {
            file_id: "photo-7".to_string(),
            caption: Some("look".to_string()),
        };

        relay
            .execute(
                &msg,
                &registration(),
                RelayDecision::RelayAdminReply {
                    destination_user_id: 99,
                    html: "look".to_string(),
                    body: msg.body.clone(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            proxy.calls(),
            vec![Call::SendPhoto {
                chat: 99,
                file_id: "photo-7".to_string(),
            }]
        );
    }
}
