//! Immutable value types for inbound Telegram traffic.
//!
//! Updates are validated once at the transport boundary and converted into
//! these types; everything past that point (routing, codecs, executor) works
//! on plain data and never touches the wire representation again.

/// What kind of chat a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
}

/// The chat a message was posted in.
#[derive(Debug, Clone)]
pub struct ChatRef {
    pub id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    /// Public @username of the chat, without the `@`.
    pub username: Option<String>,
}

impl ChatRef {
    pub fn is_private(&self) -> bool {
        self.kind == ChatKind::Private
    }

    /// The `t.me/<fragment>/<message_id>` path fragment for message permalinks.
    ///
    /// Only supergroups have permalinks: public ones link via their username,
    /// private ones via the `c/<internal id>` form (the internal id is the
    /// chat id with the `-100` marker prefix removed).
    pub fn permalink_fragment(&self) -> Option<String> {
        if self.kind != ChatKind::Supergroup {
            return None;
        }
        if let Some(username) = &self.username {
            return Some(username.clone());
        }
        let id = self.id.to_string();
        let internal = id.strip_prefix("-100").unwrap_or(&id);
        Some(format!("c/{internal}"))
    }
}

/// The sender of a message (or the original author of a forward).
#[derive(Debug, Clone)]
pub struct UserRef {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    /// Public @username, without the `@`.
    pub username: Option<String>,
}

impl UserRef {
    /// First and last name joined, trimmed.
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last).trim().to_string(),
            None => self.first_name.trim().to_string(),
        }
    }
}

/// Text annotation kinds the relay cares about; everything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationKind {
    /// Direct mention of a user without a username (carries the id).
    MentionOfUser { user_id: i64 },
    /// A text span hyperlinked to an arbitrary URL.
    Link { url: String },
    Code,
    Bold,
    Other,
}

/// A span of annotated text. Offsets and lengths are in UTF-16 code units,
/// as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub offset: usize,
    pub length: usize,
}

/// The content of a message, reduced to the kinds the relay can repost.
#[derive(Debug, Clone)]
pub enum MessageBody {
    Text { text: String },
    Photo { file_id: String, caption: Option<String> },
    Document { file_id: String, caption: Option<String> },
    /// Stickers, voice notes, polls, ... — carried so rule evaluation still
    /// runs (and ignores them), never reposted.
    Other,
}

impl MessageBody {
    pub fn caption(&self) -> Option<&str> {
        match self {
            MessageBody::Photo { caption, .. } | MessageBody::Document { caption, .. } => {
                caption.as_deref()
            }
            _ => None,
        }
    }
}

/// One inbound message, including (one level of) its reply target.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: i32,
    pub chat: ChatRef,
    pub from: UserRef,
    pub body: MessageBody,
    /// Annotations on the text (or on the caption for media messages),
    /// in platform order.
    pub annotations: Vec<Annotation>,
    pub reply_to: Option<Box<InboundMessage>>,
    /// Original author, when this message is a forward of someone else's.
    pub forward_from: Option<UserRef>,
}

impl InboundMessage {
    /// The message text, or the caption for media messages.
    pub fn text_or_caption(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { text } => Some(text.as_str()),
            other => other.caption(),
        }
    }
}
