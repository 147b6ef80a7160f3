//! Transport seam between the relay core and the Telegram API.
//!
//! The core never talks to teloxide directly: it emits calls through the
//! [`Transport`] trait, and inbound teloxide messages are converted into the
//! value types of `message` exactly once, here. Tests substitute a recording
//! implementation.

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, FileId, InputFile, MessageEntityKind, MessageId, ParseMode, ReplyParameters,
};

use crate::message::{
    Annotation, AnnotationKind, ChatKind, ChatRef, InboundMessage, MessageBody, UserRef,
};

/// Outbound side effects the relay can request. All text is HTML-formatted.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_html(&self, chat_id: i64, html: &str, reply_to: Option<i32>) -> Result<i32>;
    async fn send_photo(
        &self,
        chat_id: i64,
        file_id: &str,
        caption_html: &str,
        reply_to: Option<i32>,
    ) -> Result<i32>;
    async fn send_document(
        &self,
        chat_id: i64,
        file_id: &str,
        caption_html: &str,
        reply_to: Option<i32>,
    ) -> Result<i32>;
    async fn edit_html(&self, chat_id: i64, message_id: i32, html: &str) -> Result<()>;
    async fn edit_caption(&self, chat_id: i64, message_id: i32, html: &str) -> Result<()>;
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()>;
    /// Forward a message; returns the id of the forwarded copy.
    async fn forward_message(&self, to_chat: i64, from_chat: i64, message_id: i32) -> Result<i32>;
}

/// The real thing: a teloxide bot handle.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_html(&self, chat_id: i64, html: &str, reply_to: Option<i32>) -> Result<i32> {
        let mut req = self
            .bot
            .send_message(ChatId(chat_id), html)
            .parse_mode(ParseMode::Html);
        if let Some(id) = reply_to {
            req = req.reply_parameters(ReplyParameters::new(MessageId(id)));
        }
        Ok(req.await?.id.0)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        file_id: &str,
        caption_html: &str,
        reply_to: Option<i32>,
    ) -> Result<i32> {
        let mut req = self
            .bot
            .send_photo(ChatId(chat_id), InputFile::file_id(FileId(file_id.to_string())))
            .caption(caption_html)
            .parse_mode(ParseMode::Html);
        if let Some(id) = reply_to {
            req = req.reply_parameters(ReplyParameters::new(MessageId(id)));
        }
        Ok(req.await?.id.0)
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_id: &str,
        caption_html: &str,
        reply_to: Option<i32>,
    ) -> Result<i32> {
        let mut req = self
            .bot
            .send_document(ChatId(chat_id), InputFile::file_id(FileId(file_id.to_string())))
            .caption(caption_html)
            .parse_mode(ParseMode::Html);
        if let Some(id) = reply_to {
            req = req.reply_parameters(ReplyParameters::new(MessageId(id)));
        }
        Ok(req.await?.id.0)
    }

    async fn edit_html(&self, chat_id: i64, message_id: i32, html: &str) -> Result<()> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), html)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn edit_caption(&self, chat_id: i64, message_id: i32, html: &str) -> Result<()> {
        self.bot
            .edit_message_caption(ChatId(chat_id), MessageId(message_id))
            .caption(html)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await?;
        Ok(())
    }

    async fn forward_message(&self, to_chat: i64, from_chat: i64, message_id: i32) -> Result<i32> {
        let fwd = self
            .bot
            .forward_message(ChatId(to_chat), ChatId(from_chat), MessageId(message_id))
            .await?;
        Ok(fwd.id.0)
    }
}

/// Convert a teloxide message into the relay's value types.
///
/// Returns `None` for messages without a sender (channel service posts and
/// the like) or in chats the relay has no rules for (channels).
pub fn convert_message(msg: &Message) -> Option<InboundMessage> {
    let chat_kind = if msg.chat.is_private() {
        ChatKind::Private
    } else if msg.chat.is_group() {
        ChatKind::Group
    } else if msg.chat.is_supergroup() {
        ChatKind::Supergroup
    } else {
        return None;
    };

    let from = convert_user(msg.from.as_ref()?);
    let chat = ChatRef {
        id: msg.chat.id.0,
        kind: chat_kind,
        title: msg.chat.title().map(str::to_string),
        username: msg.chat.username().map(str::to_string),
    };

    let body = if let Some(text) = msg.text() {
        MessageBody::Text {
            text: text.to_string(),
        }
    } else if let Some(size) = msg.photo().and_then(|sizes| sizes.first()) {
        MessageBody::Photo {
            file_id: size.file.id.0.clone(),
            caption: msg.caption().map(str::to_string),
        }
    } else if let Some(doc) = msg.document() {
        MessageBody::Document {
            file_id: doc.file.id.0.clone(),
            caption: msg.caption().map(str::to_string),
        }
    } else {
        MessageBody::Other
    };

    let annotations = msg
        .entities()
        .or_else(|| msg.caption_entities())
        .map(convert_entities)
        .unwrap_or_default();

    Some(InboundMessage {
        id: msg.id.0,
        chat,
        from,
        body,
        annotations,
        reply_to: msg
            .reply_to_message()
            .and_then(convert_message)
            .map(Box::new),
        forward_from: msg.forward_from_user().map(convert_user),
    })
}

fn convert_user(user: &teloxide::types::User) -> UserRef {
    UserRef {
        id: user.id.0 as i64,
        is_bot: user.is_bot,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
    }
}

fn convert_entities(entities: &[teloxide::types::MessageEntity]) -> Vec<Annotation> {
    entities
        .iter()
        .map(|entity| Annotation {
            kind: match &entity.kind {
                MessageEntityKind::TextMention { user } => AnnotationKind::MentionOfUser {
                    user_id: user.id.0 as i64,
                },
                MessageEntityKind::TextLink { url } => AnnotationKind::Link {
                    url: url.to_string(),
                },
                MessageEntityKind::Code => AnnotationKind::Code,
                MessageEntityKind::Bold => AnnotationKind::Bold,
                _ => AnnotationKind::Other,
            },
            offset: entity.offset,
            length: entity.length,
        })
        .collect()
}
